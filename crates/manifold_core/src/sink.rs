//! Output sinks.
//!
//! A sink receives every file a run emits. [`FsSink`] writes to disk or into
//! archive streams; [`DryRunSink`] only records and logs what would be
//! written.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::archive::{ArchiveRegistry, FinishedArchive};
use crate::error::EngineResult;

/// Where an emitted file goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// A path on disk, relative to the working directory at write time.
    Disk(PathBuf),
    /// An entry inside an archive stream.
    Archive { archive: PathBuf, entry: String },
}

impl OutputTarget {
    /// Target for `$out`, inside `archive` when one is active.
    pub fn new(out: &str, archive: Option<&Path>) -> Self {
        match archive {
            Some(archive) => OutputTarget::Archive {
                archive: archive.to_path_buf(),
                entry: entry_name(Path::new(out)),
            },
            None => OutputTarget::Disk(PathBuf::from(out)),
        }
    }

    /// Target for a file copied into the directory `dir`.
    pub fn in_dir(dir: Option<&str>, file_name: &str, archive: Option<&Path>) -> Self {
        let dir = dir.map(str::trim).filter(|dir| !dir.is_empty() && *dir != ".");
        let out = match dir {
            Some(dir) => Path::new(dir).join(file_name),
            None => PathBuf::from(file_name),
        };
        Self::new(&out.to_string_lossy(), archive)
    }
}

impl fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTarget::Disk(path) => write!(f, "{}", path.display()),
            OutputTarget::Archive { archive, entry } => {
                write!(f, "{}:{}", archive.display(), entry)
            }
        }
    }
}

/// Archive entry name for `path`: relative, `/`-separated, without `.` parts.
fn entry_name(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// A write a dry run would have performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutput {
    pub target: String,
    /// The content for writes; `None` for copies.
    pub content: Option<String>,
    /// The copied file for copies.
    pub source: Option<PathBuf>,
}

/// Receives the files a run emits.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Write `content` to `target`, creating parent directories.
    async fn write(&self, target: &OutputTarget, content: &[u8]) -> EngineResult<()>;

    /// Copy the file at `source` to `target`.
    async fn copy(&self, source: &Path, target: &OutputTarget) -> EngineResult<()>;

    /// Intended writes recorded by a dry run.
    fn planned(&self) -> Vec<PlannedOutput> {
        Vec::new()
    }

    /// Finalize any open archives.
    fn finish(&self) -> EngineResult<Vec<FinishedArchive>> {
        Ok(Vec::new())
    }
}

/// Writes to the filesystem and to archive streams.
#[derive(Default)]
pub struct FsSink {
    archives: ArchiveRegistry,
}

impl FsSink {
    pub fn new() -> Self {
        Self::default()
    }
}

async fn ensure_parent(path: &Path) -> EngineResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl OutputSink for FsSink {
    async fn write(&self, target: &OutputTarget, content: &[u8]) -> EngineResult<()> {
        match target {
            OutputTarget::Disk(path) => {
                ensure_parent(path).await?;
                tokio::fs::write(path, content).await?;
            }
            OutputTarget::Archive { archive, entry } => {
                self.archives.append(archive, entry, content)?;
            }
        }
        debug!("Wrote {}", target);
        Ok(())
    }

    async fn copy(&self, source: &Path, target: &OutputTarget) -> EngineResult<()> {
        match target {
            OutputTarget::Disk(path) => {
                ensure_parent(path).await?;
                tokio::fs::copy(source, path).await?;
            }
            OutputTarget::Archive { archive, entry } => {
                let content = tokio::fs::read(source).await?;
                self.archives.append(archive, entry, &content)?;
            }
        }
        debug!("Copied {:?} to {}", source, target);
        Ok(())
    }

    fn finish(&self) -> EngineResult<Vec<FinishedArchive>> {
        self.archives.finish_all()
    }
}

/// Records intended writes without touching the filesystem.
#[derive(Default)]
pub struct DryRunSink {
    planned: Mutex<Vec<PlannedOutput>>,
}

impl DryRunSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutputSink for DryRunSink {
    async fn write(&self, target: &OutputTarget, content: &[u8]) -> EngineResult<()> {
        let content = String::from_utf8_lossy(content).into_owned();
        info!("Would write {}", target);
        debug!("{}", content);
        self.planned.lock().push(PlannedOutput {
            target: target.to_string(),
            content: Some(content),
            source: None,
        });
        Ok(())
    }

    async fn copy(&self, source: &Path, target: &OutputTarget) -> EngineResult<()> {
        info!("Would copy {:?} to {}", source, target);
        self.planned.lock().push(PlannedOutput {
            target: target.to_string(),
            content: None,
            source: Some(source.to_path_buf()),
        });
        Ok(())
    }

    fn planned(&self) -> Vec<PlannedOutput> {
        self.planned.lock().clone()
    }
}
