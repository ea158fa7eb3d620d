use crate::internal::{
    apply::transaction::{ApplyError, CommitReport, Phase, SyncPolicy},
    config::{Config, ConfigError},
    engine::request::{OperationFlags, OperationRequest, RequestError},
    kernel::{
        catalog::{CatalogError, KernelCatalog},
        entry::KernelId,
    },
    loader::{
        backend::{select_backend, BackendError, BootTarget, Bootloader},
        context::BootContext,
    },
    system::{HostProbe, Mode, SystemProbe},
};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Request(#[from] RequestError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderAction {
    Installed,
    Updated,
    Unchanged,
    Removed,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub kernels: usize,
    pub default: KernelId,
    pub files_written: usize,
    pub files_removed: usize,
    pub removed_kernels: Vec<KernelId>,
    pub loader: LoaderAction,
}

impl UpdateReport {
    pub fn changed(&self) -> bool {
        self.files_written > 0 || self.files_removed > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelStatus {
    pub id: KernelId,
    pub booted: bool,
    pub default: bool,
}

pub struct BootManager {
    ctx: BootContext,
    mode: Mode,
    probe: Box<dyn SystemProbe>,
    backend: Box<dyn Bootloader>,
}

impl BootManager {
    pub fn open(root: &Path, mode: Mode) -> Result<Self, BootError> {
        let config = Config::load(root)?;
        let ctx = BootContext::new(root, config, SyncPolicy::Enabled);
        Self::new(ctx, mode, Box::new(HostProbe::new()))
    }

    pub fn new(ctx: BootContext, mode: Mode, probe: Box<dyn SystemProbe>) -> Result<Self, BootError> {
        let backend = select_backend(&ctx)?;
        tracing::debug!(
            "Using {} for {} ({:?} mode)",
            backend.name(),
            ctx.root.display(),
            mode
        );
        Ok(Self::with_backend(ctx, mode, probe, backend))
    }

    pub fn with_backend(
        ctx: BootContext,
        mode: Mode,
        probe: Box<dyn SystemProbe>,
        backend: Box<dyn Bootloader>,
    ) -> Self {
        Self {
            ctx,
            mode,
            probe,
            backend,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn root(&self) -> &Path {
        &self.ctx.root
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub fn backend(&self) -> &dyn Bootloader {
        self.backend.as_ref()
    }

    pub fn running_kernel(&self) -> Option<KernelId> {
        match self.mode {
            Mode::Native => self.probe.running_kernel(),
            Mode::Image => None,
        }
    }

    pub fn scan(&self) -> Result<KernelCatalog, BootError> {
        let running = self.running_kernel();
        Ok(KernelCatalog::scan(
            &self.ctx.kernel_dir(),
            self.ctx.namespace(),
            self.ctx.config.tie_break,
            running.as_ref(),
        )?)
    }

    pub fn default_target(&self, catalog: &KernelCatalog) -> Result<BootTarget, BootError> {
        let booted = catalog.booted_entry(self.mode);
        let entry = catalog.select_default(&self.ctx.config.primary_flavor, self.mode, booted)?;
        let target = BootTarget::new(entry, &self.ctx.config.os_name);
        Ok(target.with_retained(self.retained_kernels(catalog)?))
    }

    // The running kernel keeps its boot entry while its files are still
    // installed, even once it has left the root.
    fn retained_kernels(&self, catalog: &KernelCatalog) -> Result<Vec<KernelId>, BootError> {
        let running = match self.running_kernel() {
            Some(id) if !catalog.contains(&id) => id,
            _ => return Ok(Vec::new()),
        };
        if self.backend.installed_kernels()?.contains(&running) {
            Ok(vec![running])
        } else {
            Ok(Vec::new())
        }
    }

    pub fn needs_update(&self) -> Result<bool, BootError> {
        Ok(!self.backend.matches_source()?)
    }

    pub fn modify_bootloader(&self, request: OperationRequest) -> Result<LoaderAction, BootError> {
        self.apply_request(request).map(|(action, _)| action)
    }

    pub fn modify_bootloader_flags(&self, flags: OperationFlags) -> Result<LoaderAction, BootError> {
        self.modify_bootloader(OperationRequest::try_from(flags)?)
    }

    fn apply_request(&self, request: OperationRequest) -> Result<(LoaderAction, CommitReport), BootError> {
        let action = match request {
            OperationRequest::Remove => {
                let report = self.backend.uninstall()?;
                tracing::info!("Removed {}", self.backend.name());
                return Ok((LoaderAction::Removed, report));
            }
            OperationRequest::Update { force: false } if self.backend.matches_source()? => {
                tracing::debug!("{} already matches its source", self.backend.name());
                return Ok((LoaderAction::Unchanged, CommitReport::default()));
            }
            OperationRequest::Install => LoaderAction::Installed,
            OperationRequest::Update { .. } => LoaderAction::Updated,
        };

        let catalog = self.scan()?;
        let target = self.default_target(&catalog)?;
        let mut report = CommitReport::default();
        match action {
            LoaderAction::Installed => {
                if self.backend.is_installed() {
                    tracing::info!("{} is already installed, reinstalling", self.backend.name());
                }
                merge(&mut report, self.backend.set_default(&target, &catalog)?);
                merge(&mut report, self.backend.install(&target, &catalog)?);
            }
            _ => merge(&mut report, self.backend.update(&target, &catalog)?),
        }

        // Kernels may have changed underneath us while the loader was written.
        merge(&mut report, self.refresh_default()?.1);
        Ok((action, report))
    }

    fn refresh_default(&self) -> Result<(BootTarget, CommitReport), BootError> {
        let catalog = self.scan()?;
        let target = self.default_target(&catalog)?;
        let report = self.backend.set_default(&target, &catalog)?;
        Ok((target, report))
    }

    // Fails before writing anything when no kernel exists.
    pub fn update(&self) -> Result<UpdateReport, BootError> {
        let catalog = self.scan()?;
        if let Err(e) = catalog.require_kernels() {
            tracing::error!("Refusing to update {}: {}", self.root().display(), e);
            return Err(e.into());
        }
        let target = self.default_target(&catalog)?;
        tracing::info!(
            "Updating {} kernels, default {}",
            catalog.len(),
            target.id()
        );

        let mut report = CommitReport::default();
        merge(&mut report, self.backend.install_kernels(&catalog)?);
        merge(&mut report, self.backend.set_default(&target, &catalog)?);

        let running = self.running_kernel();
        let mut removed_kernels = Vec::new();
        for id in self.backend.installed_kernels()? {
            if catalog.contains(&id) {
                continue;
            }
            if running.as_ref() == Some(&id) {
                tracing::info!("Keeping entry of running kernel {}", id);
                continue;
            }
            tracing::info!("Removing stale kernel {}", id);
            merge(&mut report, self.backend.remove(&id)?);
            removed_kernels.push(id);
        }

        let request = if self.backend.is_installed() {
            OperationRequest::update()
        } else {
            OperationRequest::install()
        };
        let (loader, loader_report) = self.apply_request(request)?;
        merge(&mut report, loader_report);

        Ok(UpdateReport {
            kernels: catalog.len(),
            default: target.id().clone(),
            files_written: report.written,
            files_removed: report.removed,
            removed_kernels,
            loader,
        })
    }

    pub fn list_kernels(&self) -> Result<Vec<KernelStatus>, BootError> {
        let catalog = self.scan()?;
        let default = if catalog.is_empty() {
            None
        } else {
            Some(self.default_target(&catalog)?.id().clone())
        };
        Ok(catalog
            .entries()
            .iter()
            .rev()
            .map(|e| KernelStatus {
                id: e.id.clone(),
                booted: e.booted,
                default: default.as_ref() == Some(&e.id),
            })
            .collect())
    }

    pub fn get_timeout(&self) -> Result<Option<u32>, BootError> {
        Ok(self.ctx.timeout()?)
    }

    pub fn set_timeout(&self, timeout: Option<u32>) -> Result<(), BootError> {
        let mut tx = self.ctx.transaction();
        match timeout.filter(|t| *t > 0) {
            Some(seconds) => tx.stage_write_in(Phase::Menu, self.ctx.timeout_path(), format!("{}\n", seconds)),
            None => tx.stage_remove(self.ctx.timeout_path()),
        }
        tx.commit()?;

        if self.backend.is_installed() && !self.scan()?.is_empty() {
            self.refresh_default()?;
        }
        Ok(())
    }
}

fn merge(total: &mut CommitReport, step: CommitReport) {
    total.written += step.written;
    total.unchanged += step.unchanged;
    total.removed += step.removed;
}
