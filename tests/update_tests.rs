//! End-to-end reconciliation tests against playground roots

mod common;

use bootman::internal::{
    engine::{
        manager::{BootError, BootManager, LoaderAction},
        request::{OperationFlags, OperationRequest},
    },
    kernel::catalog::CatalogError,
    loader::backend::BackendError,
};
use common::Playground;

#[test]
fn test_image_update_selects_newest_kernel() {
    let pg = Playground::uefi();
    pg.add_kernel("4.6.0-180.native");
    pg.add_kernel("4.4.4-160.native");
    pg.add_kernel("4.4.0-150.native");

    let manager = pg.image_manager();
    let report = manager.update().unwrap();

    assert_eq!(report.kernels, 3);
    assert_eq!(report.default.to_string(), "4.6.0-180.native");
    assert_eq!(report.loader, LoaderAction::Installed);
    assert_eq!(pg.default_kernel(), Some(Playground::slug("4.6.0-180.native")));
    assert!(manager.backend().is_installed());
    assert!(!manager.needs_update().unwrap());

    for identity in ["4.6.0-180.native", "4.4.4-160.native", "4.4.0-150.native"] {
        assert!(pg.exists(&pg.entry_rel(identity)), "missing entry for {}", identity);
    }
    assert!(pg.exists("boot/EFI/Boot/BOOTX64.EFI") || pg.exists("boot/EFI/Boot/BOOTAA64.EFI"));
}

#[test]
fn test_native_update_moves_default_to_newer_kernel() {
    let pg = Playground::uefi();
    pg.add_kernel("4.4.4-160.native");

    let manager = pg.native_manager("4.4.4-160.native");
    manager.update().unwrap();
    assert_eq!(pg.default_kernel(), Some(Playground::slug("4.4.4-160.native")));

    pg.add_kernel("4.6.0-180.native");
    let report = manager.update().unwrap();

    assert_eq!(report.default.to_string(), "4.6.0-180.native");
    assert_eq!(pg.default_kernel(), Some(Playground::slug("4.6.0-180.native")));
    // The booted kernel keeps its entry.
    assert!(pg.exists(&pg.entry_rel("4.4.4-160.native")));
}

#[test]
fn test_booted_newest_kernel_stays_default() {
    let pg = Playground::uefi();
    pg.add_kernel("4.4.0-150.native");
    pg.add_kernel("4.4.4-160.native");

    let manager = pg.native_manager("4.4.4-160.native");
    let report = manager.update().unwrap();

    assert_eq!(report.default.to_string(), "4.4.4-160.native");
    assert_eq!(pg.default_kernel(), Some(Playground::slug("4.4.4-160.native")));
}

fn check_loader_revision_cycle(pg: &Playground, manager: &BootManager) {
    let action = manager.modify_bootloader(OperationRequest::install()).unwrap();
    assert_eq!(action, LoaderAction::Installed);
    assert!(!manager.needs_update().unwrap());

    pg.push_bootloader_update(1);
    assert!(manager.needs_update().unwrap());
    assert!(manager.needs_update().unwrap(), "query must not change state");
    let action = manager.modify_bootloader(OperationRequest::update()).unwrap();
    assert_eq!(action, LoaderAction::Updated);
    assert!(!manager.needs_update().unwrap());

    pg.push_bootloader_update(2);
    assert!(manager.needs_update().unwrap());
    let action = manager
        .modify_bootloader_flags(OperationFlags::UPDATE | OperationFlags::NO_CHECK)
        .unwrap();
    assert_eq!(action, LoaderAction::Updated);
    assert!(!manager.needs_update().unwrap());

    // Forced again while already in sync.
    let action = manager
        .modify_bootloader_flags(OperationFlags::UPDATE | OperationFlags::NO_CHECK)
        .unwrap();
    assert_eq!(action, LoaderAction::Updated);
    assert!(!manager.needs_update().unwrap());

    let action = manager.modify_bootloader(OperationRequest::update()).unwrap();
    assert_eq!(action, LoaderAction::Unchanged);
}

#[test]
fn test_bootloader_revisions_image_uefi() {
    let pg = Playground::uefi();
    pg.add_kernel("4.4.4-160.native");
    check_loader_revision_cycle(&pg, &pg.image_manager());
}

#[test]
fn test_bootloader_revisions_native_uefi() {
    let pg = Playground::uefi();
    pg.add_kernel("4.4.4-160.native");
    check_loader_revision_cycle(&pg, &pg.native_manager("4.4.4-160.native"));
}

#[test]
fn test_bootloader_revisions_image_bios() {
    let pg = Playground::bios();
    pg.add_kernel("4.4.4-160.native");
    check_loader_revision_cycle(&pg, &pg.image_manager());
}

#[test]
fn test_bootloader_revisions_native_bios() {
    let pg = Playground::bios();
    pg.add_kernel("4.4.4-160.native");
    check_loader_revision_cycle(&pg, &pg.native_manager("4.4.4-160.native"));
}

#[test]
fn test_short_and_full_versions_are_separate_kernels() {
    let pg = Playground::uefi();
    let short = pg.add_kernel("6.1-12.lts");
    pg.add_kernel("6.1.0-12.lts");
    let manager = pg.image_manager();

    let report = manager.update().unwrap();
    assert_eq!(report.kernels, 2);
    assert!(pg.exists(&pg.entry_rel("6.1-12.lts")));
    assert!(pg.exists(&pg.entry_rel("6.1.0-12.lts")));

    pg.remove_kernel(&short);
    let report = manager.update().unwrap();
    assert_eq!(report.removed_kernels, vec![short]);
    assert!(!pg.exists(&pg.entry_rel("6.1-12.lts")));
    assert!(pg.exists(&pg.entry_rel("6.1.0-12.lts")));
}

#[test]
fn test_update_is_idempotent() {
    let pg = Playground::uefi();
    pg.add_kernel("4.6.0-180.native");
    pg.add_kernel("4.4.4-160.native");
    let manager = pg.image_manager();

    let first = manager.update().unwrap();
    assert!(first.changed());
    assert!(!manager.needs_update().unwrap());

    let second = manager.update().unwrap();
    assert_eq!(second.files_written, 0);
    assert_eq!(second.files_removed, 0);
    assert_eq!(second.loader, LoaderAction::Unchanged);
    assert!(!second.changed());
}

#[cfg(unix)]
#[test]
fn test_forced_update_rewrites_matching_payload() {
    use std::os::unix::fs::MetadataExt;

    let pg = Playground::uefi();
    pg.add_kernel("4.4.4-160.native");
    let manager = pg.image_manager();
    manager.update().unwrap();
    assert!(manager.backend().matches_source().unwrap());

    let loader = pg.path("boot/loader/loader.conf");
    let before = std::fs::metadata(&loader).unwrap().ino();

    let action = manager
        .modify_bootloader(OperationRequest::update())
        .unwrap();
    assert_eq!(action, LoaderAction::Unchanged);
    assert_eq!(std::fs::metadata(&loader).unwrap().ino(), before);

    let action = manager
        .modify_bootloader_flags(OperationFlags::UPDATE | OperationFlags::NO_CHECK)
        .unwrap();
    assert_eq!(action, LoaderAction::Updated);
    assert_ne!(std::fs::metadata(&loader).unwrap().ino(), before);
    assert!(!manager.needs_update().unwrap());
}

#[test]
fn test_zero_kernels_writes_nothing() {
    let pg = Playground::uefi();
    let manager = pg.image_manager();

    let err = manager.update().unwrap_err();
    assert!(matches!(err, BootError::Catalog(CatalogError::Empty)));
    assert!(!pg.exists("boot"));

    let err = manager
        .modify_bootloader(OperationRequest::install())
        .unwrap_err();
    assert!(matches!(err, BootError::Catalog(CatalogError::Empty)));
    assert!(!pg.exists("boot"));
}

#[test]
fn test_update_before_install_is_rejected() {
    let pg = Playground::uefi();
    pg.add_kernel("4.4.4-160.native");
    let manager = pg.image_manager();

    let err = manager
        .modify_bootloader(OperationRequest::update())
        .unwrap_err();
    assert!(matches!(
        err,
        BootError::Backend(BackendError::NotInstalled(_))
    ));
}

#[test]
fn test_stale_entries_are_pruned() {
    let pg = Playground::uefi();
    let old = pg.add_kernel("4.4.0-150.native");
    pg.add_kernel("4.4.4-160.native");
    let manager = pg.image_manager();
    manager.update().unwrap();
    assert!(pg.exists(&pg.entry_rel("4.4.0-150.native")));

    pg.remove_kernel(&old);
    let report = manager.update().unwrap();

    assert_eq!(report.removed_kernels, vec![old]);
    assert!(!pg.exists(&pg.entry_rel("4.4.0-150.native")));
    assert!(!pg.exists("boot/EFI/org.bootman/kernel-org.bootman.native.4.4.0-150"));
    assert!(!pg.exists("boot/EFI/org.bootman/initrd-org.bootman.native.4.4.0-150"));
    assert!(pg.exists(&pg.entry_rel("4.4.4-160.native")));
}

#[test]
fn test_running_kernel_entry_survives_removal() {
    let pg = Playground::uefi();
    let booted = pg.add_kernel("4.4.4-160.native");
    pg.add_kernel("4.6.0-180.native");
    let manager = pg.native_manager("4.4.4-160.native");
    manager.update().unwrap();

    pg.remove_kernel(&booted);
    let report = manager.update().unwrap();

    assert!(report.removed_kernels.is_empty());
    assert!(pg.exists(&pg.entry_rel("4.4.4-160.native")));
    assert_eq!(pg.default_kernel(), Some(Playground::slug("4.6.0-180.native")));

    // Once another kernel is running the entry goes.
    let manager = pg.native_manager("4.6.0-180.native");
    let report = manager.update().unwrap();
    assert_eq!(report.removed_kernels, vec![booted]);
    assert!(!pg.exists(&pg.entry_rel("4.4.4-160.native")));
}

#[test]
fn test_entries_carry_initrd_and_cmdline() {
    let mut pg = Playground::uefi();
    pg.config.root_options = Some("root=PARTUUID=abcd".to_string());
    pg.add_kernel("4.4.4-160.native");
    pg.add_bare_kernel("4.4.5-161.kvm");
    pg.image_manager().update().unwrap();

    let entry = pg.read(&pg.entry_rel("4.4.4-160.native"));
    assert!(entry.contains("title Linux (4.4.4-160.native)"));
    assert!(entry.contains("linux /EFI/org.bootman/kernel-org.bootman.native.4.4.4-160"));
    assert!(entry.contains("initrd /EFI/org.bootman/initrd-org.bootman.native.4.4.4-160"));
    assert!(entry.contains("options root=PARTUUID=abcd quiet rw"));

    let bare = pg.read(&pg.entry_rel("4.4.5-161.kvm"));
    assert!(!bare.contains("initrd"));
    assert!(bare.contains("options root=PARTUUID=abcd\n"));
}

#[test]
fn test_primary_flavor_wins_over_newer_other_flavor() {
    let pg = Playground::uefi();
    pg.add_kernel("4.4.4-160.native");
    pg.add_kernel("5.0.0-1.kvm");
    let report = pg.image_manager().update().unwrap();

    assert_eq!(report.default.to_string(), "4.4.4-160.native");
}

#[test]
fn test_fallback_to_other_flavor_without_primary() {
    let pg = Playground::uefi();
    pg.add_kernel("4.9.0-3.lts");
    pg.add_kernel("5.0.0-1.kvm");
    let report = pg.image_manager().update().unwrap();

    assert_eq!(report.default.to_string(), "5.0.0-1.kvm");
}

#[test]
fn test_timeout_is_written_into_menu() {
    let pg = Playground::uefi();
    pg.add_kernel("4.4.4-160.native");
    let manager = pg.image_manager();
    manager.update().unwrap();
    assert_eq!(manager.get_timeout().unwrap(), None);

    manager.set_timeout(Some(5)).unwrap();
    assert_eq!(manager.get_timeout().unwrap(), Some(5));
    assert!(pg.read("boot/loader/loader.conf").starts_with("timeout 5\n"));

    manager.set_timeout(Some(0)).unwrap();
    assert_eq!(manager.get_timeout().unwrap(), None);
    assert!(!pg.exists("etc/kernel/timeout"));
    assert!(!pg.read("boot/loader/loader.conf").contains("timeout"));
}

#[test]
fn test_remove_bootloader() {
    let pg = Playground::uefi();
    pg.add_kernel("4.4.4-160.native");
    let manager = pg.image_manager();
    manager.update().unwrap();

    let action = manager.modify_bootloader(OperationRequest::remove()).unwrap();
    assert_eq!(action, LoaderAction::Removed);
    assert!(!manager.backend().is_installed());
    assert!(!pg.exists("boot/loader/loader.conf"));
    assert!(manager.needs_update().unwrap());
}

#[test]
fn test_list_kernels_marks_default_and_booted() {
    let pg = Playground::uefi();
    pg.add_kernel("4.4.4-160.native");
    pg.add_kernel("4.6.0-180.native");
    let kernels = pg.native_manager("4.4.4-160.native").list_kernels().unwrap();

    assert_eq!(kernels.len(), 2);
    assert_eq!(kernels[0].id.to_string(), "4.6.0-180.native");
    assert!(kernels[0].default);
    assert!(!kernels[0].booted);
    assert!(kernels[1].booted);
    assert!(!kernels[1].default);
}
