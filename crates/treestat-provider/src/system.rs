//! `std::fs`-backed worktree probe.

use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use treestat_types::{FileFingerprint, NormalizedPath};

use crate::traits::WorktreeProbe;

/// Name of the repository admin marker.
const ADMIN_MARKER: &str = ".git";

/// A [`WorktreeProbe`] that answers from the live filesystem.
///
/// Probes are pure metadata lookups (`stat` and admin-marker walk-ups); the
/// probe never reads file contents and never touches repository internals.
/// The filesystem is always addressed through the preserved spelling
/// ([`NormalizedPath::raw`]) so mixed-case paths stat correctly on
/// case-sensitive filesystems; the lower-cased key stays a cache-only
/// concern.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemWorktreeProbe;

impl SystemWorktreeProbe {
    /// Create a new probe.
    pub fn new() -> Self {
        Self
    }

    fn marker_exists(path: &NormalizedPath) -> bool {
        // Submodules carry a `.git` file rather than a directory, so any
        // entry type counts.
        Path::new(path.raw()).join(ADMIN_MARKER).exists()
    }
}

impl WorktreeProbe for SystemWorktreeProbe {
    fn exists(&self, path: &NormalizedPath) -> bool {
        Path::new(path.raw()).exists()
    }

    fn is_directory(&self, path: &NormalizedPath) -> bool {
        fs::metadata(path.raw())
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    fn fingerprint(&self, path: &NormalizedPath) -> Option<FileFingerprint> {
        let meta = fs::metadata(path.raw()).ok()?;
        let mtime_ticks = meta
            .modified()
            .ok()?
            .duration_since(UNIX_EPOCH)
            .ok()?
            .as_millis() as u64;
        Some(FileFingerprint::new(mtime_ticks, meta.permissions().readonly()))
    }

    fn repository_root(&self, path: &NormalizedPath) -> Option<NormalizedPath> {
        let mut cursor = Some(path.clone());
        while let Some(p) = cursor {
            if Self::marker_exists(&p) {
                return Some(p);
            }
            cursor = p.parent();
        }
        None
    }

    fn is_repository_root(&self, path: &NormalizedPath) -> bool {
        Self::marker_exists(path)
    }

    fn is_admin_path(&self, path: &NormalizedPath) -> bool {
        path.as_str()
            .split('/')
            .any(|component| component == ADMIN_MARKER)
    }
}
