//! Error types for the cache crate.
//!
//! Ordinary cache misses are not errors: absence of data is represented by
//! `StatusKind::None` and every read path has a defined fallback value.
//! Errors here are provider failures and malformed snapshots.

use treestat_provider::ProviderError;
use treestat_types::TypeError;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The status provider failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A foundation type failed to decode.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// I/O failure reading or writing a snapshot.
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot carried an unexpected format version.
    #[error("snapshot version mismatch: found {found}, expected {expected}")]
    SnapshotVersion {
        /// The version read from the snapshot.
        found: u32,
        /// The version this build writes and accepts.
        expected: u32,
    },

    /// A snapshot string length exceeded the path-length ceiling.
    #[error("snapshot path length {0} exceeds ceiling")]
    PathTooLong(usize),

    /// A snapshot record was structurally malformed.
    #[error("malformed snapshot: {0}")]
    Snapshot(String),

    /// An invalid path was provided.
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Convenience alias for cache results.
pub type CacheResult<T> = Result<T, CacheError>;
