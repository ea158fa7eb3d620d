// Boot manager library entry point

pub mod internal {
    pub mod config;
    pub mod system;
    pub mod kernel {
        pub mod catalog;
        pub mod entry;
    }
    pub mod apply {
        pub mod files;
        pub mod transaction;
    }
    pub mod loader {
        pub mod backend;
        pub mod context;
        pub mod extlinux;
        pub mod systemd_boot;
    }
    pub mod engine {
        pub mod manager;
        pub mod request;
    }
}

// Re-export key types for external use
pub use internal::apply::transaction::{ApplyError, CommitReport, SyncPolicy, Transaction};
pub use internal::config::{BackendKind, Config, ConfigError, TieBreak};
pub use internal::engine::manager::{BootError, BootManager, KernelStatus, LoaderAction, UpdateReport};
pub use internal::engine::request::{OperationFlags, OperationRequest, RequestError};
pub use internal::kernel::catalog::{CatalogError, KernelCatalog};
pub use internal::kernel::entry::{KernelEntry, KernelId, KernelVersion};
pub use internal::loader::backend::{BackendError, BootTarget, Bootloader, BootloaderState};
pub use internal::loader::context::BootContext;
pub use internal::system::{FixedProbe, HostProbe, Mode, SystemProbe};
