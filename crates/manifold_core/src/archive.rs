//! Archive streams shared across a run.
//!
//! Every distinct archive path maps to one open stream. Streams are created
//! on first use, receive entries from any directive or nested expansion that
//! names them, and are written out together when the run finishes.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::{EngineError, EngineResult};

/// Container format chosen from the archive file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    pub fn detect(path: &Path) -> EngineResult<Self> {
        let name = path.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Ok(ArchiveKind::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(ArchiveKind::TarGz)
        } else if name.ends_with(".tar") {
            Ok(ArchiveKind::Tar)
        } else {
            Err(EngineError::UnsupportedArchive(path.to_path_buf()))
        }
    }
}

enum Sink {
    Zip(ZipWriter<File>),
    Tar(tar::Builder<File>),
    TarGz(tar::Builder<GzEncoder<File>>),
}

fn tar_header(size: usize) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_size(size as u64);
    header.set_mode(0o644);
    header
}

impl Sink {
    fn write_entry(&mut self, entry: &str, content: &[u8]) -> EngineResult<()> {
        match self {
            Sink::Zip(writer) => {
                writer.start_file(entry.to_string(), SimpleFileOptions::default())?;
                writer.write_all(content)?;
            }
            Sink::Tar(builder) => builder.append_data(&mut tar_header(content.len()), entry, content)?,
            Sink::TarGz(builder) => {
                builder.append_data(&mut tar_header(content.len()), entry, content)?
            }
        }
        Ok(())
    }

    fn close(self) -> EngineResult<()> {
        match self {
            Sink::Zip(writer) => {
                writer.finish()?;
            }
            Sink::Tar(builder) => {
                builder.into_inner()?.flush()?;
            }
            Sink::TarGz(builder) => {
                builder.into_inner()?.finish()?.flush()?;
            }
        }
        Ok(())
    }
}

/// One open archive and the entries pending for it.
///
/// Entries are held until the archive is finished. Writing an entry name a
/// second time replaces its content and keeps its position.
struct ArchiveStream {
    sink: Sink,
    pending: Vec<(String, Vec<u8>)>,
    positions: HashMap<String, usize>,
}

impl ArchiveStream {
    fn create(path: &Path) -> EngineResult<Self> {
        let kind = ArchiveKind::detect(path)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let sink = match kind {
            ArchiveKind::Zip => Sink::Zip(ZipWriter::new(file)),
            ArchiveKind::Tar => Sink::Tar(tar::Builder::new(file)),
            ArchiveKind::TarGz => {
                Sink::TarGz(tar::Builder::new(GzEncoder::new(file, Compression::default())))
            }
        };
        debug!("Opened {:?} archive {:?}", kind, path);
        Ok(Self {
            sink,
            pending: Vec::new(),
            positions: HashMap::new(),
        })
    }

    fn append(&mut self, entry: &str, content: &[u8]) {
        match self.positions.get(entry) {
            Some(&index) => {
                debug!("Replacing archive entry {}", entry);
                self.pending[index].1 = content.to_vec();
            }
            None => {
                self.positions.insert(entry.to_string(), self.pending.len());
                self.pending.push((entry.to_string(), content.to_vec()));
            }
        }
    }

    fn finish(self) -> EngineResult<Vec<String>> {
        let Self { mut sink, pending, .. } = self;
        let mut entries = Vec::with_capacity(pending.len());
        for (entry, content) in pending {
            sink.write_entry(&entry, &content)?;
            entries.push(entry);
        }
        sink.close()?;
        Ok(entries)
    }
}

/// Normalize an archive path against the current working directory.
pub fn archive_key(path: &Path) -> EngineResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// A finalized archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedArchive {
    pub path: PathBuf,
    pub entries: Vec<String>,
}

/// The archive streams of one run, keyed by absolute path.
#[derive(Default)]
pub struct ArchiveRegistry {
    streams: Mutex<HashMap<PathBuf, ArchiveStream>>,
}

impl ArchiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry to the archive at `archive`, opening it if needed.
    pub fn append(&self, archive: &Path, entry: &str, content: &[u8]) -> EngineResult<()> {
        let key = archive_key(archive)?;
        let mut streams = self.streams.lock();
        if !streams.contains_key(&key) {
            let stream = ArchiveStream::create(&key)?;
            streams.insert(key.clone(), stream);
        }
        if let Some(stream) = streams.get_mut(&key) {
            stream.append(entry, content);
        }
        Ok(())
    }

    /// Finalize every open stream. Streams are removed as they are finalized,
    /// so a second call finalizes nothing.
    pub fn finish_all(&self) -> EngineResult<Vec<FinishedArchive>> {
        let streams: Vec<_> = self.streams.lock().drain().collect();
        let mut finished = Vec::with_capacity(streams.len());
        let mut first_error = None;

        for (path, stream) in streams {
            match stream.finish() {
                Ok(entries) => {
                    info!("Wrote archive {:?} ({} entries)", path, entries.len());
                    finished.push(FinishedArchive { path, entries });
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                finished.sort_by(|a, b| a.path.cmp(&b.path));
                Ok(finished)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn test_detect_kind() {
        assert_eq!(ArchiveKind::detect(Path::new("a.zip")).unwrap(), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::detect(Path::new("a.tar")).unwrap(), ArchiveKind::Tar);
        assert_eq!(ArchiveKind::detect(Path::new("a.tgz")).unwrap(), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::detect(Path::new("a.TAR.GZ")).unwrap(), ArchiveKind::TarGz);
        assert!(matches!(
            ArchiveKind::detect(Path::new("a.rar")),
            Err(EngineError::UnsupportedArchive(_))
        ));
    }

    #[test]
    fn test_zip_entries_are_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        let registry = ArchiveRegistry::new();
        registry.append(&path, "a/one.txt", b"one").unwrap();
        registry.append(&path, "two.txt", b"two").unwrap();

        let finished = registry.finish_all().unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].entries, vec!["a/one.txt", "two.txt"]);
        assert!(registry.finish_all().unwrap().is_empty());

        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let mut content = String::new();
        archive
            .by_name("a/one.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "one");
    }

    #[test]
    fn test_rewritten_zip_entry_keeps_last_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.zip");
        let registry = ArchiveRegistry::new();
        registry.append(&path, "README.yaml", b"first").unwrap();
        registry.append(&path, "other.yaml", b"other").unwrap();
        registry.append(&path, "README.yaml", b"second").unwrap();

        let finished = registry.finish_all().unwrap();
        assert_eq!(finished[0].entries, vec!["README.yaml", "other.yaml"]);

        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        let mut content = String::new();
        archive
            .by_name("README.yaml")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "second");
    }

    #[test]
    fn test_tar_gz_entries_are_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/bundle.tar.gz");
        let registry = ArchiveRegistry::new();
        registry.append(&path, "x.yaml", b"a: 1\n").unwrap();
        registry.finish_all().unwrap();

        let decoder = flate2::read::GzDecoder::new(File::open(&path).unwrap());
        let mut archive = tar::Archive::new(decoder);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["x.yaml"]);
    }
}
