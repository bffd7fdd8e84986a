//! Error types for the foundation crate.

/// Errors that can occur constructing or decoding foundation types.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    /// A status discriminant from a snapshot did not name a known kind.
    #[error("unknown status kind discriminant: {0}")]
    UnknownStatusKind(u8),

    /// An invalid path was provided.
    #[error("invalid path: {0}")]
    InvalidPath(String),
}
