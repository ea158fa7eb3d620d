use crate::internal::{
    apply::files,
    config::TieBreak,
    kernel::entry::{KernelEntry, KernelId},
    system::Mode,
};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("No kernels found, nothing to boot")]
    Empty,
    #[error("Failed to scan kernels in {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct KernelCatalog {
    entries: Vec<KernelEntry>,
    tie_break: TieBreak,
}

impl KernelCatalog {
    pub fn from_entries(entries: Vec<KernelEntry>, tie_break: TieBreak) -> Self {
        let mut seen = HashSet::new();
        let mut entries: Vec<KernelEntry> = entries
            .into_iter()
            .filter(|e| seen.insert(e.id.clone()))
            .collect();
        entries.sort_by(|a, b| a.id.compare(&b.id, tie_break));
        Self { entries, tie_break }
    }

    // Malformed names are logged and skipped. A missing directory yields an
    // empty catalog.
    pub fn scan(
        kernel_dir: &Path,
        namespace: &str,
        tie_break: TieBreak,
        running: Option<&KernelId>,
    ) -> Result<Self, CatalogError> {
        let names = match files::list_dir(kernel_dir) {
            Ok(names) => names,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Kernel directory {} does not exist", kernel_dir.display());
                Vec::new()
            }
            Err(source) => {
                return Err(CatalogError::Io {
                    path: kernel_dir.to_path_buf(),
                    source,
                })
            }
        };

        let prefix = format!("{}.", namespace);
        let mut entries = Vec::new();
        for name in names.iter().filter(|n| n.starts_with(&prefix)) {
            let image = kernel_dir.join(name);
            if !image.is_file() {
                continue;
            }
            let id = match KernelId::from_image_name(namespace, name) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("Skipping kernel {}: {}", image.display(), e);
                    continue;
                }
            };
            let cmdline = read_cmdline(&kernel_dir.join(format!("cmdline-{}", id)))
                .map_err(|source| CatalogError::Io {
                    path: kernel_dir.join(format!("cmdline-{}", id)),
                    source,
                })?;
            let initrd = kernel_dir.join(format!("initrd-{}", name));
            let booted = running == Some(&id);
            entries.push(KernelEntry {
                id,
                image,
                initrd: initrd.is_file().then_some(initrd),
                cmdline,
                booted,
            });
        }

        tracing::debug!("Discovered {} kernels in {}", entries.len(), kernel_dir.display());
        Ok(Self::from_entries(entries, tie_break))
    }

    pub fn entries(&self) -> &[KernelEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    pub fn get(&self, id: &KernelId) -> Option<&KernelEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn contains(&self, id: &KernelId) -> bool {
        self.get(id).is_some()
    }

    pub fn require_kernels(&self) -> Result<(), CatalogError> {
        if self.is_empty() {
            Err(CatalogError::Empty)
        } else {
            Ok(())
        }
    }

    pub fn booted_entry(&self, mode: Mode) -> Option<&KernelEntry> {
        match mode {
            Mode::Native => self.entries.iter().find(|e| e.booted),
            Mode::Image => None,
        }
    }

    pub fn newest_of(&self, flavor: &str) -> Option<&KernelEntry> {
        self.entries
            .iter()
            .filter(|e| e.flavor() == flavor)
            .max_by(|a, b| a.id.compare(&b.id, self.tie_break))
    }

    // The newest kernel of the primary flavor always wins; a booted kernel is
    // kept only while it is that newest kernel. Without any primary flavor
    // kernel the newest kernel overall is used.
    pub fn select_default(
        &self,
        primary_flavor: &str,
        mode: Mode,
        booted: Option<&KernelEntry>,
    ) -> Result<&KernelEntry, CatalogError> {
        self.require_kernels()?;

        let newest = match self.newest_of(primary_flavor) {
            Some(entry) => entry,
            None => {
                tracing::warn!(
                    "No '{}' kernels installed, falling back to the newest kernel",
                    primary_flavor
                );
                self.entries.last().ok_or(CatalogError::Empty)?
            }
        };

        if mode == Mode::Native {
            match booted {
                Some(b) if b.id == newest.id => {
                    tracing::debug!("Booted kernel {} remains the default", b.id);
                }
                Some(b) => {
                    tracing::info!("Booted kernel {} is superseded by {}", b.id, newest.id);
                }
                None => {}
            }
        }
        Ok(newest)
    }
}

fn read_cmdline(path: &Path) -> std::io::Result<String> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect::<Vec<_>>()
            .join(" ")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}
