//! The [`StatusProvider`] and [`WorktreeProbe`] traits the cache consumes.
//!
//! Any backend (a real VCS binding, a scripted test world) implements these
//! to feed the cache. Both traits must be thread-safe: the cache calls them
//! from reader threads and crawl workers concurrently, and never while
//! holding a node lock.

use std::fmt;

use serde::{Deserialize, Serialize};
use treestat_types::{merge, FileFingerprint, NormalizedPath, StatusKind};

use crate::error::ProviderResult;

/// A provider-reported status before folding: separate text and property
/// components plus the index flags carried through unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStatus {
    /// Content status.
    pub text: StatusKind,
    /// Property/metadata status.
    pub prop: StatusKind,
    /// The index marks this entry assume-valid.
    pub assume_valid: bool,
    /// The index marks this entry skip-worktree.
    pub skip_worktree: bool,
}

impl RawStatus {
    /// A raw status where both components carry the same kind.
    pub fn uniform(kind: StatusKind) -> Self {
        Self {
            text: kind,
            prop: kind,
            assume_valid: false,
            skip_worktree: false,
        }
    }

    /// The folded (text, property) status.
    pub fn effective(&self) -> StatusKind {
        merge(self.text, self.prop)
    }
}

/// One child discovered during a directory enumeration.
///
/// The original design invoked a re-entrant callback per child; here each
/// callback invocation is reified as a value the caller drains after the
/// enumeration returns, so no provider call ever re-enters the cache while
/// a lock is held.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildReport {
    /// Absolute normalized path of the child.
    pub path: NormalizedPath,
    /// The child's raw status.
    pub status: RawStatus,
    /// Whether the child is a directory.
    pub is_dir: bool,
}

/// Result of enumerating one directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    /// The enumerated directory's own status.
    pub status: StatusKind,
    /// One report per discovered immediate child.
    pub children: Vec<ChildReport>,
}

/// Opaque head-revision identifier.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionId(pub String);

impl fmt::Debug for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RevisionId({})", self.0)
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw version-control status computation.
///
/// `root` is always a repository root previously obtained from
/// [`WorktreeProbe::repository_root`]; `rel_path` is the queried path
/// relative to it (empty string for the root itself).
///
/// Implementations may block on I/O. The cache only calls this trait from
/// its explicit fetch path (crawl workers), never from the cache-first
/// query path.
pub trait StatusProvider: Send + Sync {
    /// Whether the path is tracked by the repository.
    fn is_under_version_control(
        &self,
        root: &NormalizedPath,
        rel_path: &str,
        is_dir: bool,
    ) -> ProviderResult<bool>;

    /// Enumerate one directory, reporting its own status and every
    /// immediate child.
    fn enumerate_directory(
        &self,
        root: &NormalizedPath,
        rel_path: &str,
    ) -> ProviderResult<DirectoryListing>;

    /// Status of a single tracked file.
    fn file_status(&self, root: &NormalizedPath, rel_path: &str) -> ProviderResult<ChildReport>;

    /// Whether an untracked path matches an ignore rule.
    fn is_ignored(&self, root: &NormalizedPath, rel_path: &str) -> ProviderResult<bool>;

    /// Whether the ignore rules relevant to `rel_path` changed since they
    /// were last loaded.
    fn ignore_rules_changed(&self, root: &NormalizedPath, rel_path: &str)
        -> ProviderResult<bool>;

    /// Reload the ignore rules relevant to `rel_path`.
    fn reload_ignore_rules(&self, root: &NormalizedPath, rel_path: &str) -> ProviderResult<()>;

    /// The repository's current head revision.
    fn head_revision(&self, root: &NormalizedPath) -> ProviderResult<RevisionId>;
}

/// OS-level facts about the working tree, independent of any VCS logic.
///
/// The cache uses this to validate fingerprints and find repository
/// boundaries without paying for a provider call.
pub trait WorktreeProbe: Send + Sync {
    /// Whether the path currently exists on disk.
    fn exists(&self, path: &NormalizedPath) -> bool;

    /// Whether the path is a directory. `false` for files and for paths
    /// that do not exist.
    fn is_directory(&self, path: &NormalizedPath) -> bool;

    /// Live fingerprint of the path, or `None` if it cannot be stat'd.
    fn fingerprint(&self, path: &NormalizedPath) -> Option<FileFingerprint>;

    /// The root of the repository containing `path`, or `None` when the
    /// path is outside any repository.
    fn repository_root(&self, path: &NormalizedPath) -> Option<NormalizedPath>;

    /// Whether `path` itself carries a repository admin marker (it is the
    /// root of a repository or a nested one such as a submodule).
    fn is_repository_root(&self, path: &NormalizedPath) -> bool;

    /// Whether `path` lies inside a repository admin area. Such paths are
    /// never cached.
    fn is_admin_path(&self, path: &NormalizedPath) -> bool;
}
