//! Submission file handles
//!
//! A `SubmissionFile` is the user-selected file: name, byte length, a
//! content-type hint, and a `ByteSource` that can be reopened by each stage
//! (inspection, hashing, extraction, upload) without sharing read cursors.

use std::fmt;
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Readable and seekable byte stream handed to parsers and the hasher
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Where the bytes of a submission live
pub trait ByteSource: Send + Sync {
    /// Open a fresh reader positioned at offset 0
    fn open(&self) -> io::Result<Box<dyn ReadSeek>>;

    /// Local path, if the bytes are file-backed (lets the transport stream)
    fn local_path(&self) -> Option<&Path> {
        None
    }
}

/// File on the local filesystem
#[derive(Debug, Clone)]
pub struct PathSource {
    path: PathBuf,
}

impl PathSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ByteSource for PathSource {
    fn open(&self) -> io::Result<Box<dyn ReadSeek>> {
        let file = std::fs::File::open(&self.path)?;
        Ok(Box::new(io::BufReader::new(file)))
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Bytes already held in memory
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl ByteSource for MemorySource {
    fn open(&self) -> io::Result<Box<dyn ReadSeek>> {
        Ok(Box::new(Cursor::new(ArcBytes(self.data.clone()))))
    }
}

struct ArcBytes(Arc<[u8]>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// The user-selected file for one ingest attempt
///
/// Immutable once built. Cloning shares the underlying source.
#[derive(Clone)]
pub struct SubmissionFile {
    name: String,
    size: u64,
    content_type: String,
    source: Arc<dyn ByteSource>,
}

impl SubmissionFile {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        content_type: Option<String>,
        source: Arc<dyn ByteSource>,
    ) -> Self {
        let name = name.into();
        let content_type = content_type.unwrap_or_else(|| {
            mime_guess::from_path(&name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });

        Self {
            name,
            size,
            content_type,
            source,
        }
    }

    /// Build from a path on disk, reading the size from filesystem metadata
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let size = std::fs::metadata(path)?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self::new(name, size, None, Arc::new(PathSource::new(path))))
    }

    /// Build from in-memory bytes
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        let data: Arc<[u8]> = data.into();
        let size = data.len() as u64;
        Self::new(name, size, None, Arc::new(MemorySource::new(data)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Lower-cased extension including the dot, if any
    pub fn extension(&self) -> Option<String> {
        let idx = self.name.rfind('.')?;
        Some(self.name[idx..].to_ascii_lowercase())
    }

    pub fn open(&self) -> io::Result<Box<dyn ReadSeek>> {
        self.source.open()
    }

    pub fn source(&self) -> &Arc<dyn ByteSource> {
        &self.source
    }
}

impl fmt::Debug for SubmissionFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionFile")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}
