//! Error types for provider implementations.

use treestat_types::NormalizedPath;

/// Errors that can occur while a provider computes raw status.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider has no knowledge of the given path.
    #[error("path unknown to the provider: {0}")]
    UnknownPath(NormalizedPath),

    /// The path is not inside a repository at all.
    #[error("not a repository: {0}")]
    NotARepository(NormalizedPath),

    /// Underlying I/O failure while walking the working tree.
    #[error("worktree I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for provider results.
pub type ProviderResult<T> = Result<T, ProviderError>;
