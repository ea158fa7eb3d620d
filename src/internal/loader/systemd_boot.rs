// UEFI backend writing Boot Loader Specification entries for systemd-boot.

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

#[cfg(target_arch = "aarch64")]
const EFI_ARCH: &str = "aa64";
#[cfg(not(target_arch = "aarch64"))]
const EFI_ARCH: &str = "x64";

pub struct SystemdBoot {
    ctx: BootContext,
}

impl SystemdBoot {
    pub const NAME: &'static str = "systemd-boot";

    pub fn new(ctx: BootContext) -> Self {
        Self { ctx }
    }

    pub fn loader_file_name() -> String {
        format!("systemd-boot{}.efi", EFI_ARCH)
    }

    fn fallback_file_name() -> String {
        format!("BOOT{}.EFI", EFI_ARCH.to_uppercase())
    }

    pub fn source_dir(&self) -> PathBuf {
        self.ctx.resolve(&self.ctx.config.systemd_boot_source)
    }

    pub fn source_available(&self) -> bool {
        self.source_dir().join(Self::loader_file_name()).is_file()
    }

    fn efi_dir(&self) -> PathBuf {
        self.ctx.boot_dir().join("EFI")
    }

    fn kernel_dest_dir(&self) -> PathBuf {
        self.efi_dir().join(self.ctx.namespace())
    }

    fn entries_dir(&self) -> PathBuf {
        self.ctx.boot_dir().join("loader").join("entries")
    }

    fn loader_conf(&self) -> PathBuf {
        self.ctx.boot_dir().join("loader").join("loader.conf")
    }

    fn entry_path(&self, id: &KernelId) -> PathBuf {
        self.entries_dir()
            .join(format!("{}.conf", id.entry_slug(self.ctx.namespace())))
    }

    fn payload(&self) -> Vec<PayloadFile> {
        vec![PayloadFile {
            source: self.source_dir().join(Self::loader_file_name()),
            targets: vec![
                self.efi_dir().join("systemd").join(Self::loader_file_name()),
                self.efi_dir().join("Boot").join(Self::fallback_file_name()),
            ],
        }]
    }

    fn render_entry(&self, entry: &KernelEntry) -> String {
        let namespace = self.ctx.namespace();
        let mut out = format!(
            "title {} ({})\nlinux /EFI/{}/kernel-{}\n",
            self.ctx.config.os_name,
            entry.id,
            namespace,
            entry.id.image_name(namespace)
        );
        if let Some(initrd) = entry.initrd_name() {
            out.push_str(&format!("initrd /EFI/{}/{}\n", namespace, initrd));
        }
        let options = self.ctx.options_for(&entry.cmdline);
        if !options.is_empty() {
            out.push_str(&format!("options {}\n", options));
        }
        out
    }

    fn render_loader_conf(&self, target: &BootTarget) -> Result<String, BackendError> {
        let mut out = String::new();
        if let Some(timeout) = self.ctx.timeout()? {
            out.push_str(&format!("timeout {}\n", timeout));
        }
        out.push_str(&format!(
            "default {}.conf\n",
            target.id().entry_slug(self.ctx.namespace())
        ));
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

    fn write_loader(&self, target: &BootTarget) -> Result<CommitReport, BackendError> {
        let mut tx = self.ctx.transaction().force_writes();
        self.stage_payload(&mut tx)?;
        tx.stage_write_in(Phase::Menu, self.loader_conf(), self.render_loader_conf(target)?);
        Ok(tx.commit()?)
    }
}

impl Bootloader for SystemdBoot {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn state(&self) -> Result<BootloaderState, BackendError> {
        inspect_payload(&self.source_dir(), &self.efi_dir(), &self.payload())
    }

    fn is_installed(&self) -> bool {
        self.payload()
            .iter()
            .flat_map(|f| f.targets.iter())
            .all(|t| t.is_file())
    }

    fn install(&self, target: &BootTarget, _catalog: &KernelCatalog) -> Result<CommitReport, BackendError> {
        tracing::info!("Installing {} with default {}", Self::NAME, target.id());
        self.write_loader(target)
    }

    fn update(&self, target: &BootTarget, _catalog: &KernelCatalog) -> Result<CommitReport, BackendError> {
        if !self.is_installed() {
            return Err(BackendError::NotInstalled(Self::NAME));
        }
        tracing::info!("Updating {}", Self::NAME);
        self.write_loader(target)
    }

    fn uninstall(&self) -> Result<CommitReport, BackendError> {
        let mut tx = self.ctx.transaction();
        tx.stage_remove(self.loader_conf());
        for file in self.payload() {
            for target in file.targets {
                tx.stage_remove(target);
            }
        }
        Ok(tx.commit()?)
    }

    fn install_kernels(&self, catalog: &KernelCatalog) -> Result<CommitReport, BackendError> {
        let namespace = self.ctx.namespace();
        let dest = self.kernel_dest_dir();
        let mut tx = self.ctx.transaction();
        for entry in catalog.entries() {
            tx.stage_copy(
                Phase::Payload,
                &entry.image,
                dest.join(format!("kernel-{}", entry.id.image_name(namespace))),
            )?;
            if let (Some(initrd), Some(name)) = (entry.initrd.as_ref(), entry.initrd_name()) {
                tx.stage_copy(Phase::Payload, initrd, dest.join(name))?;
            }
            tx.stage_write_in(Phase::Entry, self.entry_path(&entry.id), self.render_entry(entry));
        }
        Ok(tx.commit()?)
    }

    fn installed_kernels(&self) -> Result<Vec<KernelId>, BackendError> {
        let dir = self.entries_dir();
        let names = match files::list_dir(&dir) {
            Ok(names) => names,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(BackendError::Io { path: dir, source }),
        };
        let prefix = format!("{}-", self.ctx.namespace());
        Ok(names
            .iter()
            .filter_map(|n| n.strip_prefix(&prefix)?.strip_suffix(".conf"))
            .filter_map(parse_slug)
            .collect())
    }

    fn remove(&self, id: &KernelId) -> Result<CommitReport, BackendError> {
        let namespace = self.ctx.namespace();
        let image = id.image_name(namespace);
        let dest = self.kernel_dest_dir();
        let mut tx = self.ctx.transaction();
        // The entry goes before the files it points at.
        tx.stage_remove(self.entry_path(id));
        tx.stage_remove(dest.join(format!("kernel-{}", image)));
        tx.stage_remove(dest.join(format!("initrd-{}", image)));
        Ok(tx.commit()?)
    }

    fn set_default(&self, target: &BootTarget, _catalog: &KernelCatalog) -> Result<CommitReport, BackendError> {
        let mut tx = self.ctx.transaction();
        tx.stage_write_in(Phase::Menu, self.loader_conf(), self.render_loader_conf(target)?);
        Ok(tx.commit()?)
    }
}

// <flavor>-<version>-<release>
fn parse_slug(slug: &str) -> Option<KernelId> {
    let (rest, release) = slug.rsplit_once('-')?;
    let (flavor, version) = rest.rsplit_once('-')?;
    KernelId::parse(&format!("{}-{}.{}", version, release, flavor)).ok()
}
