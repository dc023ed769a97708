//! Error kinds shared across the evochora telemetry pipeline.
//!
//! Each subsystem (codec, storage, resume, indexer, configuration) owns a
//! leaf error type and adapts it into the umbrella [`Error`] via `From`,
//! rather than folding everything into one flat enum.

use std::fmt;
use thiserror::Error;

/// A coarse classification of where an [`Error`] originated.
///
/// Intentionally small and not meant to be exhaustively matched against;
/// callers that need the full detail should match on the wrapped leaf
/// error instead.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorKind {
    Config,
    Codec,
    Storage,
    Resume,
    Indexer,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Config => "Config",
            ErrorKind::Codec => "Codec",
            ErrorKind::Storage => "Storage",
            ErrorKind::Resume => "Resume",
            ErrorKind::Indexer => "Indexer",
        };
        f.write_str(name)
    }
}

/// The umbrella error type returned across crate boundaries.
#[derive(Debug, Error)]
#[error("{kind}: {source}")]
pub struct Error {
    kind: ErrorKind,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn new(kind: ErrorKind, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            kind,
            source: Box::new(source),
        }
    }
}

/// Configuration errors are fatal at construction time (§7).
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value} (must be >= 1)")]
    InvalidInterval { field: &'static str, value: i64 },
    #[error("required resource missing: {name}")]
    MissingResource { name: String },
}

/// Errors raised by the delta codec's decoder.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum CodecError {
    #[error("tick {requested} not in chunk [{first_tick}, {last_tick}]")]
    TickNotInChunk {
        requested: u64,
        first_tick: u64,
        last_tick: u64,
    },
    #[error("chunk corrupt: {0}")]
    ChunkCorrupt(String),
}

/// Errors raised while locating or reading a checkpoint to resume from.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ResumeError {
    #[error("no metadata found for run {run_id}")]
    MetadataNotFound { run_id: String },
    #[error("run id mismatch: expected {expected}, found {found}")]
    RunIdMismatch { expected: String, found: String },
    #[error("batch file {path} contained no chunks")]
    EmptyBatchFile { path: String },
}

/// Errors surfaced by the object store / persisted-state driver seam.
///
/// The concrete driver (filesystem, RocksDB, a cloud object store) is an
/// external collaborator; this type only adapts its error into the
/// umbrella so callers don't need to know which driver is backing the
/// store.
#[derive(Debug, Error)]
#[error("storage error: {0}")]
pub struct StorageError(#[from] Box<dyn std::error::Error + Send + Sync + 'static>);

impl StorageError {
    pub fn new(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(source))
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::new(ErrorKind::Config, e)
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Error::new(ErrorKind::Codec, e)
    }
}

impl From<ResumeError> for Error {
    fn from(e: ResumeError) -> Self {
        Error::new(ErrorKind::Resume, e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::new(ErrorKind::Storage, e)
    }
}

/// A plain string reason, for the indexer's own runtime-fault records that
/// don't have a more specific leaf type.
#[derive(Debug, Error, Clone)]
#[error("{0}")]
pub struct IndexerError(pub String);

impl From<IndexerError> for Error {
    fn from(e: IndexerError) -> Self {
        Error::new(ErrorKind::Indexer, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_adapts_with_kind() {
        let err: Error = ConfigError::InvalidInterval {
            field: "snapshot_interval",
            value: 0,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("snapshot_interval"));
    }

    #[test]
    fn codec_error_adapts_with_kind() {
        let err: Error = CodecError::TickNotInChunk {
            requested: 10,
            first_tick: 0,
            last_tick: 5,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Codec);
    }
}
