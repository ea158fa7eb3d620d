use crate::internal::kernel::entry::KernelId;
use serde::Serialize;
use std::{fs, path::PathBuf};

const OSRELEASE_PATH: &str = "/proc/sys/kernel/osrelease";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Native,
    Image,
}

pub trait SystemProbe {
    fn running_release(&self) -> Option<String>;

    fn running_kernel(&self) -> Option<KernelId> {
        let release = self.running_release()?;
        match KernelId::parse(&release) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::debug!("Running kernel is not managed here: {}", e);
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostProbe {
    path: PathBuf,
}

impl HostProbe {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from(OSRELEASE_PATH),
        }
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for HostProbe {
    fn running_release(&self) -> Option<String> {
        fs::read_to_string(&self.path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FixedProbe {
    release: Option<String>,
}

impl FixedProbe {
    pub fn new(release: Option<&str>) -> Self {
        Self {
            release: release.map(str::to_string),
        }
    }
}

impl SystemProbe for FixedProbe {
    fn running_release(&self) -> Option<String> {
        self.release.clone()
    }
}
