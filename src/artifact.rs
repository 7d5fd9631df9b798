//! Durable artifacts holding the payload each side sends and receives.
//!
//! A side reads the bytes it will send from a [`PayloadSource`] and writes the
//! bytes it received to a [`PayloadSink`]. Two backends are provided:
//! - [`FileArtifact`]: a file on disk, read in full and written with overwrite
//!   semantics
//! - [`MemoryArtifact`]: a shared in-memory slot, for tests and embedders

use bytes::Bytes;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::trace;

/// Failure to load or persist an artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The artifact has never been written.
    #[error("artifact {0} does not exist")]
    Missing(String),
    #[error("failed to read artifact {location}: {source}")]
    Read {
        location: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write artifact {location}: {source}")]
    Write {
        location: String,
        #[source]
        source: io::Error,
    },
}

/// Where outbound payloads come from.
pub trait PayloadSource {
    /// Read the whole artifact.
    fn load(&self) -> Result<Bytes, ArtifactError>;

    /// Human-readable location, used in logs and errors.
    fn location(&self) -> String;
}

/// Where inbound payloads go.
pub trait PayloadSink {
    /// Replace the artifact's contents with `payload`.
    fn persist(&self, payload: &[u8]) -> Result<(), ArtifactError>;

    fn location(&self) -> String;
}

/// File-backed artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileArtifact {
    path: PathBuf,
}

impl FileArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PayloadSource for FileArtifact {
    fn load(&self) -> Result<Bytes, ArtifactError> {
        match std::fs::read(&self.path) {
            Ok(data) => {
                trace!(path = %self.path.display(), bytes = data.len(), "Loaded artifact");
                Ok(Bytes::from(data))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ArtifactError::Missing(PayloadSource::location(self)))
            }
            Err(source) => Err(ArtifactError::Read {
                location: PayloadSource::location(self),
                source,
            }),
        }
    }

    fn location(&self) -> String {
        format!("'{}'", self.path.display())
    }
}

impl PayloadSink for FileArtifact {
    fn persist(&self, payload: &[u8]) -> Result<(), ArtifactError> {
        std::fs::write(&self.path, payload).map_err(|source| ArtifactError::Write {
            location: PayloadSink::location(self),
            source,
        })?;
        trace!(path = %self.path.display(), bytes = payload.len(), "Persisted artifact");
        Ok(())
    }

    fn location(&self) -> String {
        format!("'{}'", self.path.display())
    }
}

/// In-memory artifact.
///
/// Clones share the same slot, so one handle can be given to a listener or
/// connector while another is kept to seed or inspect the contents.
#[derive(Clone, Default)]
pub struct MemoryArtifact {
    name: String,
    slot: Arc<Mutex<Option<Bytes>>>,
}

impl MemoryArtifact {
    /// An empty slot; loading it fails with [`ArtifactError::Missing`].
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: Arc::default(),
        }
    }

    /// A slot pre-seeded with `payload`.
    pub fn with_contents(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        let artifact = Self::empty(name);
        artifact.replace(payload.into());
        artifact
    }

    /// Current contents, or `None` if nothing was ever written.
    pub fn contents(&self) -> Option<Bytes> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, payload: Bytes) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(payload);
    }
}

impl fmt::Debug for MemoryArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryArtifact")
            .field("name", &self.name)
            .field("len", &self.contents().map(|b| b.len()))
            .finish()
    }
}

impl PayloadSource for MemoryArtifact {
    fn load(&self) -> Result<Bytes, ArtifactError> {
        self.contents()
            .ok_or_else(|| ArtifactError::Missing(PayloadSource::location(self)))
    }

    fn location(&self) -> String {
        format!("memory:{}", self.name)
    }
}

impl PayloadSink for MemoryArtifact {
    fn persist(&self, payload: &[u8]) -> Result<(), ArtifactError> {
        self.replace(Bytes::copy_from_slice(payload));
        Ok(())
    }

    fn location(&self) -> String {
        format!("memory:{}", self.name)
    }
}
