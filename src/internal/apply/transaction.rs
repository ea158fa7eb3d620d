use crate::internal::apply::files;
use std::{
    collections::BTreeSet,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

// Enabled unless a test or setup code turns it off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    #[default]
    Enabled,
    Disabled,
}

impl SyncPolicy {
    pub fn enabled(self) -> bool {
        self == SyncPolicy::Enabled
    }
}

// Rename order within a commit. Payloads land before the entries that
// reference them, and entries before the menu that selects among them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Payload,
    Entry,
    Menu,
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to stage {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Commit stopped after {committed} of {total} changes at {path}: {source}")]
    Commit {
        committed: usize,
        total: usize,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub written: usize,
    pub unchanged: usize,
    pub removed: usize,
}

impl CommitReport {
    pub fn changed(&self) -> bool {
        self.written > 0 || self.removed > 0
    }
}

#[derive(Debug)]
struct StagedWrite {
    phase: Phase,
    path: PathBuf,
    bytes: Vec<u8>,
}

// Nothing touches the destination tree until `Transaction::commit`. A
// failure while writing temporaries leaves the tree untouched; a failure
// while renaming leaves already renamed files in place and reports the
// commit as failed.
#[derive(Debug)]
pub struct Transaction {
    policy: SyncPolicy,
    force: bool,
    writes: Vec<StagedWrite>,
    removals: Vec<PathBuf>,
}

impl Transaction {
    pub fn new(policy: SyncPolicy) -> Self {
        Self {
            policy,
            force: false,
            writes: Vec::new(),
            removals: Vec::new(),
        }
    }

    pub fn force_writes(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.removals.is_empty()
    }

    pub fn stage_write(&mut self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        self.stage_write_in(Phase::Entry, path, bytes);
    }

    pub fn stage_write_in(
        &mut self,
        phase: Phase,
        path: impl Into<PathBuf>,
        bytes: impl Into<Vec<u8>>,
    ) {
        let path = path.into();
        // Last write to a path wins.
        self.writes.retain(|w| w.path != path);
        self.writes.push(StagedWrite {
            phase,
            path,
            bytes: bytes.into(),
        });
    }

    pub fn stage_copy(&mut self, phase: Phase, src: &Path, dst: impl Into<PathBuf>) -> Result<(), ApplyError> {
        let bytes = fs::read(src).map_err(|source| ApplyError::Read {
            path: src.to_path_buf(),
            source,
        })?;
        self.stage_write_in(phase, dst, bytes);
        Ok(())
    }

    // Removals run after every staged write has been renamed into place.
    pub fn stage_remove(&mut self, path: impl Into<PathBuf>) {
        self.removals.push(path.into());
    }

    pub fn commit(mut self) -> Result<CommitReport, ApplyError> {
        let mut report = CommitReport::default();
        self.writes.sort_by_key(|w| w.phase);

        let mut pending = Vec::new();
        for write in self.writes {
            let unchanged = !self.force
                && files::contents_match(&write.path, &write.bytes).map_err(|source| {
                    ApplyError::Read {
                        path: write.path.clone(),
                        source,
                    }
                })?;
            if unchanged {
                tracing::debug!("{} is up to date", write.path.display());
                report.unchanged += 1;
            } else {
                pending.push(write);
            }
        }
        let removals: Vec<PathBuf> = self.removals.into_iter().filter(|p| p.exists()).collect();

        let total = pending.len() + removals.len();
        if total == 0 {
            return Ok(report);
        }

        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(pending.len());
        for write in &pending {
            match write_temp(&write.path, &write.bytes, self.policy) {
                Ok(temp) => staged.push((temp, write.path.clone())),
                Err(source) => {
                    discard(staged.iter().map(|(t, _)| t.as_path()));
                    return Err(ApplyError::Stage {
                        path: write.path.clone(),
                        source,
                    });
                }
            }
        }

        let mut touched_dirs = BTreeSet::new();
        let mut committed = 0;
        for (idx, (temp, dest)) in staged.iter().enumerate() {
            if let Err(source) = fs::rename(temp, dest) {
                discard(staged[idx..].iter().map(|(t, _)| t.as_path()));
                tracing::error!("Commit failed at {}: {}", dest.display(), source);
                return Err(ApplyError::Commit {
                    committed,
                    total,
                    path: dest.clone(),
                    source,
                });
            }
            committed += 1;
            report.written += 1;
            if let Some(parent) = dest.parent() {
                touched_dirs.insert(parent.to_path_buf());
            }
            tracing::debug!("Wrote {}", dest.display());
        }

        for path in &removals {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(ApplyError::Commit {
                        committed,
                        total,
                        path: path.clone(),
                        source,
                    })
                }
            }
            committed += 1;
            report.removed += 1;
            if let Some(parent) = path.parent() {
                touched_dirs.insert(parent.to_path_buf());
            }
            tracing::debug!("Removed {}", path.display());
        }

        if self.policy.enabled() {
            for dir in &touched_dirs {
                files::sync_dir(dir).map_err(|source| ApplyError::Commit {
                    committed,
                    total,
                    path: dir.clone(),
                    source,
                })?;
            }
        }

        Ok(report)
    }
}

fn write_temp(dest: &Path, bytes: &[u8], policy: SyncPolicy) -> io::Result<PathBuf> {
    let parent = dest
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"))?;
    fs::create_dir_all(parent)?;

    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()));

    let result = (|| -> io::Result<()> {
        let mut file = fs::File::create(&temp)?;
        file.write_all(bytes)?;
        file.flush()?;
        if policy.enabled() {
            file.sync_all()?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => Ok(temp),
        Err(e) => {
            let _ = fs::remove_file(&temp);
            Err(e)
        }
    }
}

fn discard<'a>(temps: impl Iterator<Item = &'a Path>) {
    for temp in temps {
        let _ = fs::remove_file(temp);
    }
}
