//! Playground roots for integration tests

#![allow(dead_code)]

use bootman::internal::{
    apply::transaction::SyncPolicy,
    config::Config,
    engine::manager::BootManager,
    kernel::entry::KernelId,
    loader::{context::BootContext, systemd_boot::SystemdBoot},
    system::{FixedProbe, Mode},
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

pub const NAMESPACE: &str = "org.bootman";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firmware {
    Uefi,
    Bios,
}

pub struct Playground {
    dir: TempDir,
    pub firmware: Firmware,
    pub config: Config,
}

impl Playground {
    /// A root shipping the systemd-boot payload at revision 0.
    pub fn uefi() -> Self {
        Self::with_firmware(Firmware::Uefi)
    }

    /// A root shipping the syslinux modules at revision 0.
    pub fn bios() -> Self {
        Self::with_firmware(Firmware::Bios)
    }

    fn with_firmware(firmware: Firmware) -> Self {
        let playground = Self {
            dir: tempfile::tempdir().unwrap(),
            firmware,
            config: Config::default(),
        };
        playground.push_bootloader_update(0);
        playground
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn kernel_dir(&self) -> PathBuf {
        self.path("usr/lib/kernel")
    }

    /// Installs a kernel image with a command line and an initrd.
    pub fn add_kernel(&self, identity: &str) -> KernelId {
        let id = KernelId::parse(identity).unwrap();
        let dir = self.kernel_dir();
        fs::create_dir_all(&dir).unwrap();
        let image = id.image_name(NAMESPACE);
        fs::write(dir.join(&image), format!("kernel {}", id)).unwrap();
        fs::write(
            dir.join(format!("cmdline-{}", id)),
            "quiet\n# not part of the command line\nrw\n",
        )
        .unwrap();
        fs::write(dir.join(format!("initrd-{}", image)), format!("initrd {}", id)).unwrap();
        id
    }

    /// Installs a kernel image with no companion files.
    pub fn add_bare_kernel(&self, identity: &str) -> KernelId {
        let id = KernelId::parse(identity).unwrap();
        let dir = self.kernel_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(id.image_name(NAMESPACE)), format!("kernel {}", id)).unwrap();
        id
    }

    pub fn remove_kernel(&self, id: &KernelId) {
        let dir = self.kernel_dir();
        let image = id.image_name(NAMESPACE);
        for name in [
            image.clone(),
            format!("cmdline-{}", id),
            format!("initrd-{}", image),
        ] {
            let _ = fs::remove_file(dir.join(name));
        }
    }

    /// Simulates the OS shipping a new bootloader revision.
    pub fn push_bootloader_update(&self, rev: u32) {
        match self.firmware {
            Firmware::Uefi => {
                let dir = self.path("usr/lib/systemd/boot/efi");
                fs::create_dir_all(&dir).unwrap();
                fs::write(
                    dir.join(SystemdBoot::loader_file_name()),
                    format!("systemd-boot revision {}", rev),
                )
                .unwrap();
            }
            Firmware::Bios => {
                let dir = self.path("usr/share/syslinux");
                fs::create_dir_all(&dir).unwrap();
                fs::write(dir.join("ldlinux.c32"), format!("ldlinux revision {}", rev)).unwrap();
                fs::write(dir.join("menu.c32"), format!("menu revision {}", rev)).unwrap();
            }
        }
    }

    pub fn context(&self) -> BootContext {
        BootContext::new(self.root(), self.config.clone(), SyncPolicy::Disabled)
    }

    pub fn image_manager(&self) -> BootManager {
        self.manager(Mode::Image, None)
    }

    pub fn native_manager(&self, booted: &str) -> BootManager {
        self.manager(Mode::Native, Some(booted))
    }

    pub fn manager(&self, mode: Mode, booted: Option<&str>) -> BootManager {
        BootManager::new(self.context(), mode, Box::new(FixedProbe::new(booted))).unwrap()
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).unwrap()
    }

    pub fn entry_rel(&self, identity: &str) -> String {
        let id = KernelId::parse(identity).unwrap();
        format!("boot/loader/entries/{}.conf", id.entry_slug(NAMESPACE))
    }

    /// Identity the systemd-boot menu points at, if any.
    pub fn default_kernel(&self) -> Option<String> {
        let conf = fs::read_to_string(self.path("boot/loader/loader.conf")).ok()?;
        let slug = conf
            .lines()
            .find_map(|l| l.strip_prefix("default "))?
            .trim()
            .strip_suffix(".conf")?
            .to_string();
        Some(slug)
    }

    pub fn slug(identity: &str) -> String {
        KernelId::parse(identity).unwrap().entry_slug(NAMESPACE)
    }
}
