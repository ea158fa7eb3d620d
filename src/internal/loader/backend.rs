use crate::internal::{
    apply::{
        files,
        transaction::{ApplyError, CommitReport},
    },
    config::{BackendKind, ConfigError},
    kernel::{
        catalog::KernelCatalog,
        entry::{KernelEntry, KernelId},
    },
    loader::{context::BootContext, extlinux::Extlinux, systemd_boot::SystemdBoot},
};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Bootloader {0} is not installed")]
    NotInstalled(&'static str),
    #[error("Bootloader payload missing at {0}")]
    SourceMissing(PathBuf),
    #[error("No usable bootloader payload found under {0}")]
    NoUsableBackend(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootTarget {
    pub entry: KernelEntry,
    pub label: String,
    // Installed kernels gone from the root whose boot entries must survive,
    // i.e. the running kernel in native mode.
    pub retained: Vec<KernelId>,
}

impl BootTarget {
    pub fn new(entry: &KernelEntry, os_name: &str) -> Self {
        Self {
            label: format!("{} ({})", os_name, entry.id),
            entry: entry.clone(),
            retained: Vec::new(),
        }
    }

    pub fn with_retained(mut self, retained: Vec<KernelId>) -> Self {
        self.retained = retained;
        self
    }

    pub fn id(&self) -> &KernelId {
        &self.entry.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadMarker(Vec<(String, String)>);

impl PayloadMarker {
    pub fn files(&self) -> &[(String, String)] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadDescriptor {
    pub location: PathBuf,
    // `None` when any part of the payload is missing or inconsistent.
    pub marker: Option<PayloadMarker>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootloaderState {
    pub source: PayloadDescriptor,
    pub target: PayloadDescriptor,
}

impl BootloaderState {
    pub fn in_sync(&self) -> bool {
        match (&self.source.marker, &self.target.marker) {
            (Some(source), Some(target)) => source == target,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PayloadFile {
    pub source: PathBuf,
    pub targets: Vec<PathBuf>,
}

// The source marker is absent if any source file is missing. The target
// marker is absent if any copy is missing or the copies of one file differ.
pub fn inspect_payload(
    source_dir: &Path,
    target_dir: &Path,
    payload: &[PayloadFile],
) -> Result<BootloaderState, BackendError> {
    let io = |path: &Path| {
        let path = path.to_path_buf();
        move |source| BackendError::Io { path, source }
    };

    let mut source_marker = Some(Vec::new());
    let mut target_marker = Some(Vec::new());
    for file in payload {
        let name = file
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let source_digest = files::digest_file(&file.source).map_err(io(&file.source))?;
        match source_digest {
            Some(digest) => {
                if let Some(marker) = source_marker.as_mut() {
                    marker.push((name.clone(), digest));
                }
            }
            None => source_marker = None,
        }

        let mut copies = Vec::with_capacity(file.targets.len());
        for target in &file.targets {
            copies.push(files::digest_file(target).map_err(io(target))?);
        }
        let consistent = match copies.first() {
            Some(Some(first)) => copies.iter().all(|c| c.as_ref() == Some(first)),
            _ => false,
        };
        if !consistent {
            target_marker = None;
        } else if let (Some(marker), Some(Some(digest))) =
            (target_marker.as_mut(), copies.into_iter().next())
        {
            marker.push((name, digest));
        }
    }

    Ok(BootloaderState {
        source: PayloadDescriptor {
            location: source_dir.to_path_buf(),
            marker: source_marker.map(PayloadMarker),
        },
        target: PayloadDescriptor {
            location: target_dir.to_path_buf(),
            marker: target_marker.map(PayloadMarker),
        },
    })
}

pub trait Bootloader {
    fn name(&self) -> &'static str;

    fn state(&self) -> Result<BootloaderState, BackendError>;

    fn is_installed(&self) -> bool;

    fn matches_source(&self) -> Result<bool, BackendError> {
        Ok(self.state()?.in_sync())
    }

    fn install(&self, target: &BootTarget, catalog: &KernelCatalog) -> Result<CommitReport, BackendError>;

    fn update(&self, target: &BootTarget, catalog: &KernelCatalog) -> Result<CommitReport, BackendError>;

    fn uninstall(&self) -> Result<CommitReport, BackendError>;

    fn install_kernels(&self, catalog: &KernelCatalog) -> Result<CommitReport, BackendError>;

    fn installed_kernels(&self) -> Result<Vec<KernelId>, BackendError>;

    fn remove(&self, id: &KernelId) -> Result<CommitReport, BackendError>;

    fn set_default(&self, target: &BootTarget, catalog: &KernelCatalog) -> Result<CommitReport, BackendError>;
}

// Picks the backend for `ctx`. With `auto`, the first backend whose source
// payload exists under the root wins, systemd-boot before extlinux.
pub fn select_backend(ctx: &BootContext) -> Result<Box<dyn Bootloader>, BackendError> {
    match ctx.config.backend {
        BackendKind::SystemdBoot => Ok(Box::new(SystemdBoot::new(ctx.clone()))),
        BackendKind::Extlinux => Ok(Box::new(Extlinux::new(ctx.clone()))),
        BackendKind::Auto => {
            let systemd_boot = SystemdBoot::new(ctx.clone());
            if systemd_boot.source_available() {
                return Ok(Box::new(systemd_boot));
            }
            let extlinux = Extlinux::new(ctx.clone());
            if extlinux.source_available() {
                return Ok(Box::new(extlinux));
            }
            Err(BackendError::NoUsableBackend(ctx.root.clone()))
        }
    }
}
