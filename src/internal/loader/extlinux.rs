// Legacy BIOS backend: one extlinux menu listing every kernel.

use crate::internal::{
    apply::{
        files,
        transaction::{CommitReport, Phase, Transaction},
    },
    kernel::{
        catalog::KernelCatalog,
        entry::{KernelEntry, KernelId},
    },
    loader::{
        backend::{inspect_payload, BackendError, BootTarget, Bootloader, BootloaderState, PayloadFile},
        context::BootContext,
    },
};
use std::path::PathBuf;

const REQUIRED_MODULE: &str = "ldlinux.c32";
const OPTIONAL_MODULES: &[&str] = &["libcom32.c32", "libutil.c32", "menu.c32"];

pub struct Extlinux {
    ctx: BootContext,
}

impl Extlinux {
    pub const NAME: &'static str = "extlinux";

    pub fn new(ctx: BootContext) -> Self {
        Self { ctx }
    }

    pub fn source_dir(&self) -> PathBuf {
        self.ctx.resolve(&self.ctx.config.extlinux_source)
    }

    pub fn source_available(&self) -> bool {
        self.source_dir().join(REQUIRED_MODULE).is_file()
    }

    fn menu_dir(&self) -> PathBuf {
        self.ctx.boot_dir().join("extlinux")
    }

    fn menu_path(&self) -> PathBuf {
        self.menu_dir().join("extlinux.conf")
    }

    fn kernel_path(&self, id: &KernelId) -> PathBuf {
        self.ctx
            .boot_dir()
            .join(format!("kernel-{}", id.image_name(self.ctx.namespace())))
    }

    fn payload(&self) -> Vec<PayloadFile> {
        let source = self.source_dir();
        let menu_dir = self.menu_dir();
        std::iter::once(REQUIRED_MODULE)
            .chain(
                OPTIONAL_MODULES
                    .iter()
                    .copied()
                    .filter(|m| source.join(m).is_file()),
            )
            .map(|module| PayloadFile {
                source: source.join(module),
                targets: vec![menu_dir.join(module)],
            })
            .collect()
    }

    fn render_label(&self, entry: &KernelEntry) -> String {
        let namespace = self.ctx.namespace();
        let mut out = format!(
            "LABEL {}\n  MENU LABEL {} ({})\n  KERNEL ../kernel-{}\n",
            entry.id.entry_slug(namespace),
            self.ctx.config.os_name,
            entry.id,
            entry.id.image_name(namespace)
        );
        if let Some(initrd) = entry.initrd_name() {
            out.push_str(&format!("  INITRD ../{}\n", initrd));
        }
        let options = self.ctx.options_for(&entry.cmdline);
        if !options.is_empty() {
            out.push_str(&format!("  APPEND {}\n", options));
        }
        out
    }

    // Rebuilt from files already on the boot partition; the root no longer has them.
    fn retained_entry(&self, id: &KernelId) -> Option<KernelEntry> {
        let image = self.kernel_path(id);
        if !image.is_file() {
            return None;
        }
        let initrd = self
            .ctx
            .boot_dir()
            .join(format!("initrd-{}", id.image_name(self.ctx.namespace())));
        Some(KernelEntry {
            id: id.clone(),
            image,
            initrd: initrd.is_file().then_some(initrd),
            cmdline: String::new(),
            booted: true,
        })
    }

    // newest kernel first
    fn render_menu(&self, target: &BootTarget, catalog: &KernelCatalog) -> Result<String, BackendError> {
        let mut out = String::new();
        if let Some(timeout) = self.ctx.timeout()? {
            // extlinux counts in tenths of a second
            out.push_str(&format!("TIMEOUT {}\nPROMPT 1\n", timeout.saturating_mul(10)));
        }
        out.push_str(&format!(
            "DEFAULT {}\n",
            target.id().entry_slug(self.ctx.namespace())
        ));
        let mut entries: Vec<KernelEntry> = catalog.entries().to_vec();
        entries.extend(
            target
                .retained
                .iter()
                .filter(|id| !catalog.contains(id))
                .filter_map(|id| self.retained_entry(id)),
        );
        entries.sort_by(|a, b| b.id.compare(&a.id, catalog.tie_break()));
        for entry in &entries {
            out.push('\n');
            out.push_str(&self.render_label(entry));
        }
        Ok(out)
    }

    fn stage_payload(&self, tx: &mut Transaction) -> Result<(), BackendError> {
        for file in self.payload() {
            if !file.source.is_file() {
                return Err(BackendError::SourceMissing(file.source));
            }
            for target in &file.targets {
                tx.stage_copy(Phase::Payload, &file.source, target)?;
            }
        }
        Ok(())
    }

    fn write_loader(&self, target: &BootTarget, catalog: &KernelCatalog) -> Result<CommitReport, BackendError> {
        let mut tx = self.ctx.transaction().force_writes();
        self.stage_payload(&mut tx)?;
        tx.stage_write_in(Phase::Menu, self.menu_path(), self.render_menu(target, catalog)?);
        Ok(tx.commit()?)
    }
}

impl Bootloader for Extlinux {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn state(&self) -> Result<BootloaderState, BackendError> {
        inspect_payload(&self.source_dir(), &self.menu_dir(), &self.payload())
    }

    fn is_installed(&self) -> bool {
        self.menu_dir().join(REQUIRED_MODULE).is_file()
    }

    fn install(&self, target: &BootTarget, catalog: &KernelCatalog) -> Result<CommitReport, BackendError> {
        tracing::info!("Installing {} with default {}", Self::NAME, target.id());
        self.write_loader(target, catalog)
    }

    fn update(&self, target: &BootTarget, catalog: &KernelCatalog) -> Result<CommitReport, BackendError> {
        if !self.is_installed() {
            return Err(BackendError::NotInstalled(Self::NAME));
        }
        tracing::info!("Updating {}", Self::NAME);
        self.write_loader(target, catalog)
    }

    fn uninstall(&self) -> Result<CommitReport, BackendError> {
        let mut tx = self.ctx.transaction();
        tx.stage_remove(self.menu_path());
        for file in self.payload() {
            for target in file.targets {
                tx.stage_remove(target);
            }
        }
        Ok(tx.commit()?)
    }

    fn install_kernels(&self, catalog: &KernelCatalog) -> Result<CommitReport, BackendError> {
        let boot = self.ctx.boot_dir();
        let mut tx = self.ctx.transaction();
        for entry in catalog.entries() {
            tx.stage_copy(Phase::Payload, &entry.image, self.kernel_path(&entry.id))?;
            if let (Some(initrd), Some(name)) = (entry.initrd.as_ref(), entry.initrd_name()) {
                tx.stage_copy(Phase::Payload, initrd, boot.join(name))?;
            }
        }
        Ok(tx.commit()?)
    }

    fn installed_kernels(&self) -> Result<Vec<KernelId>, BackendError> {
        let boot = self.ctx.boot_dir();
        let names = match files::list_dir(&boot) {
            Ok(names) => names,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(BackendError::Io { path: boot, source }),
        };
        let namespace = self.ctx.namespace();
        Ok(names
            .iter()
            .filter_map(|n| n.strip_prefix("kernel-"))
            .filter_map(|image| KernelId::from_image_name(namespace, image).ok())
            .collect())
    }

    // Kernel files only; set_default rebuilds the menu before stale kernels are pruned.
    fn remove(&self, id: &KernelId) -> Result<CommitReport, BackendError> {
        let image = id.image_name(self.ctx.namespace());
        let mut tx = self.ctx.transaction();
        tx.stage_remove(self.kernel_path(id));
        tx.stage_remove(self.ctx.boot_dir().join(format!("initrd-{}", image)));
        Ok(tx.commit()?)
    }

    fn set_default(&self, target: &BootTarget, catalog: &KernelCatalog) -> Result<CommitReport, BackendError> {
        let mut tx = self.ctx.transaction();
        tx.stage_write_in(Phase::Menu, self.menu_path(), self.render_menu(target, catalog)?);
        Ok(tx.commit()?)
    }
}
