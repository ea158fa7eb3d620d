use crate::internal::{
    apply::transaction::{SyncPolicy, Transaction},
    config::{Config, ConfigError},
};
use std::{
    fs,
    path::{Path, PathBuf},
};

const TIMEOUT_PATH: &str = "etc/kernel/timeout";

#[derive(Debug, Clone)]
pub struct BootContext {
    pub root: PathBuf,
    pub config: Config,
    pub sync: SyncPolicy,
}

impl BootContext {
    pub fn new(root: impl Into<PathBuf>, config: Config, sync: SyncPolicy) -> Self {
        Self {
            root: root.into(),
            config,
            sync,
        }
    }

    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.sync)
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.config.resolve(&self.root, path)
    }

    pub fn boot_dir(&self) -> PathBuf {
        self.resolve(&self.config.boot_dir)
    }

    pub fn kernel_dir(&self) -> PathBuf {
        self.resolve(&self.config.kernel_dir)
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn timeout_path(&self) -> PathBuf {
        self.root.join(TIMEOUT_PATH)
    }

    pub fn timeout(&self) -> Result<Option<u32>, ConfigError> {
        let path = self.timeout_path();
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        match contents.trim() {
            "" => Ok(None),
            value => value
                .parse::<u32>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue {
                    field: "timeout",
                    value: value.to_string(),
                }),
        }
    }

    // Kernel command line for an entry: configured root options first, then
    // the kernel's own line.
    pub fn options_for(&self, cmdline: &str) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(extra) = self.config.root_options.as_deref() {
            parts.extend(extra.split_whitespace());
        }
        parts.extend(cmdline.split_whitespace());
        parts.join(" ")
    }
}
