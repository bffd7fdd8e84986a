//! In-memory scripted worktree for tests and embedding.
//!
//! [`ScriptedWorktree`] models a small filesystem plus repository layout
//! entirely in memory and implements both [`StatusProvider`] and
//! [`WorktreeProbe`] against it. Tests mutate the world between cache
//! operations to simulate edits, commits, and deletions, and read call
//! counters to assert how often the cache reached for the provider.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use treestat_types::{FileFingerprint, NormalizedPath, StatusKind};

use crate::error::{ProviderError, ProviderResult};
use crate::traits::{
    ChildReport, DirectoryListing, RawStatus, RevisionId, StatusProvider, WorktreeProbe,
};

/// One scripted path: its status, shape, and on-disk presence.
#[derive(Clone, Debug)]
struct PathSpec {
    status: RawStatus,
    is_dir: bool,
    fingerprint: Option<FileFingerprint>,
    tracked: bool,
    /// `false` models a path the provider still reports (e.g. a deleted
    /// child) but which no longer exists on disk.
    present: bool,
    /// Hidden paths are left out of directory listings while still
    /// answering single-file queries, like an unchanged file a status walk
    /// does not bother reporting.
    hidden: bool,
}

#[derive(Default)]
struct WorldState {
    /// Repository roots, including nested (submodule) roots.
    roots: BTreeSet<NormalizedPath>,
    entries: BTreeMap<NormalizedPath, PathSpec>,
    /// Paths matched by ignore rules.
    ignored: BTreeSet<NormalizedPath>,
    /// Roots whose ignore rules changed since the last reload.
    ignore_changed: BTreeSet<NormalizedPath>,
    heads: HashMap<NormalizedPath, RevisionId>,
    enumerate_calls: BTreeMap<NormalizedPath, u32>,
    file_status_calls: BTreeMap<NormalizedPath, u32>,
}

/// An in-memory implementation of [`StatusProvider`] and [`WorktreeProbe`].
///
/// All data lives behind a `RwLock`; the world is lost when dropped.
pub struct ScriptedWorktree {
    state: RwLock<WorldState>,
}

impl ScriptedWorktree {
    /// Create an empty world with no repositories.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(WorldState::default()),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, WorldState> {
        self.state.write().expect("lock poisoned")
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, WorldState> {
        self.state.read().expect("lock poisoned")
    }

    /// Register a repository root. The root directory itself becomes a
    /// tracked, present directory with `Normal` status.
    pub fn add_repository(&self, root: impl Into<NormalizedPath>) {
        let root = root.into();
        let mut state = self.write();
        state.heads.insert(root.clone(), RevisionId("0".repeat(40)));
        state.roots.insert(root.clone());
        state.entries.insert(
            root,
            PathSpec {
                status: RawStatus::uniform(StatusKind::Normal),
                is_dir: true,
                fingerprint: None,
                tracked: true,
                present: true,
                hidden: false,
            },
        );
    }

    /// Add a tracked directory with the given status.
    pub fn add_dir(&self, path: impl Into<NormalizedPath>, kind: StatusKind) {
        self.write().entries.insert(
            path.into(),
            PathSpec {
                status: RawStatus::uniform(kind),
                is_dir: true,
                fingerprint: None,
                tracked: true,
                present: true,
                hidden: false,
            },
        );
    }

    /// Add a tracked file with the given status and fingerprint.
    pub fn add_file(
        &self,
        path: impl Into<NormalizedPath>,
        kind: StatusKind,
        fingerprint: FileFingerprint,
    ) {
        self.write().entries.insert(
            path.into(),
            PathSpec {
                status: RawStatus::uniform(kind),
                is_dir: false,
                fingerprint: Some(fingerprint),
                tracked: true,
                present: true,
                hidden: false,
            },
        );
    }

    /// Add an untracked file. If `ignored`, ignore rules match it.
    pub fn add_untracked_file(
        &self,
        path: impl Into<NormalizedPath>,
        fingerprint: FileFingerprint,
        ignored: bool,
    ) {
        let path = path.into();
        let kind = if ignored {
            StatusKind::Ignored
        } else {
            StatusKind::Unversioned
        };
        let mut state = self.write();
        if ignored {
            state.ignored.insert(path.clone());
        }
        state.entries.insert(
            path,
            PathSpec {
                status: RawStatus::uniform(kind),
                is_dir: false,
                fingerprint: Some(fingerprint),
                tracked: false,
                present: true,
                hidden: false,
            },
        );
    }

    /// Add an untracked directory. If `ignored`, ignore rules match it.
    pub fn add_untracked_dir(&self, path: impl Into<NormalizedPath>, ignored: bool) {
        let path = path.into();
        let kind = if ignored {
            StatusKind::Ignored
        } else {
            StatusKind::Unversioned
        };
        let mut state = self.write();
        if ignored {
            state.ignored.insert(path.clone());
        }
        state.entries.insert(
            path,
            PathSpec {
                status: RawStatus::uniform(kind),
                is_dir: true,
                fingerprint: None,
                tracked: false,
                present: true,
                hidden: false,
            },
        );
    }

    /// Replace a path's scripted status.
    pub fn set_status(&self, path: &NormalizedPath, kind: StatusKind) {
        if let Some(spec) = self.write().entries.get_mut(path) {
            spec.status = RawStatus::uniform(kind);
        }
    }

    /// Replace a path's scripted fingerprint (models an on-disk edit).
    pub fn set_fingerprint(&self, path: &NormalizedPath, fingerprint: FileFingerprint) {
        if let Some(spec) = self.write().entries.get_mut(path) {
            spec.fingerprint = Some(fingerprint);
        }
    }

    /// Mark a path as no longer present on disk. It keeps being reported
    /// by enumerations so the cache can observe the deletion.
    pub fn remove_from_disk(&self, path: &NormalizedPath) {
        if let Some(spec) = self.write().entries.get_mut(path) {
            spec.present = false;
            spec.fingerprint = None;
        }
    }

    /// Leave a path out of future directory listings while keeping it
    /// answerable through `file_status`.
    pub fn hide_from_listing(&self, path: &NormalizedPath) {
        if let Some(spec) = self.write().entries.get_mut(path) {
            spec.hidden = true;
        }
    }

    /// Flag a root's ignore rules as changed since the last reload.
    pub fn mark_ignore_rules_changed(&self, root: &NormalizedPath) {
        self.write().ignore_changed.insert(root.clone());
    }

    /// How many times `enumerate_directory` ran for the given absolute path.
    pub fn enumerate_count(&self, path: &NormalizedPath) -> u32 {
        self.read().enumerate_calls.get(path).copied().unwrap_or(0)
    }

    /// How many times `file_status` ran for the given absolute path.
    pub fn file_status_count(&self, path: &NormalizedPath) -> u32 {
        self.read().file_status_calls.get(path).copied().unwrap_or(0)
    }

    fn absolute(root: &NormalizedPath, rel_path: &str) -> NormalizedPath {
        if rel_path.is_empty() {
            root.clone()
        } else {
            root.join(rel_path)
        }
    }
}

impl Default for ScriptedWorktree {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusProvider for ScriptedWorktree {
    fn is_under_version_control(
        &self,
        root: &NormalizedPath,
        rel_path: &str,
        _is_dir: bool,
    ) -> ProviderResult<bool> {
        let abs = Self::absolute(root, rel_path);
        let state = self.read();
        Ok(state.entries.get(&abs).map(|s| s.tracked).unwrap_or(false))
    }

    fn enumerate_directory(
        &self,
        root: &NormalizedPath,
        rel_path: &str,
    ) -> ProviderResult<DirectoryListing> {
        let abs = Self::absolute(root, rel_path);
        let mut state = self.write();
        *state.enumerate_calls.entry(abs.clone()).or_insert(0) += 1;

        let own = state
            .entries
            .get(&abs)
            .ok_or_else(|| ProviderError::UnknownPath(abs.clone()))?;
        let mut listing = DirectoryListing {
            status: own.status.effective(),
            children: Vec::new(),
        };
        for (path, spec) in &state.entries {
            if spec.hidden {
                continue;
            }
            if path.parent().as_ref() == Some(&abs) {
                listing.children.push(ChildReport {
                    path: path.clone(),
                    status: spec.status,
                    is_dir: spec.is_dir,
                });
            }
        }
        Ok(listing)
    }

    fn file_status(&self, root: &NormalizedPath, rel_path: &str) -> ProviderResult<ChildReport> {
        let abs = Self::absolute(root, rel_path);
        let mut state = self.write();
        *state.file_status_calls.entry(abs.clone()).or_insert(0) += 1;
        let spec = state
            .entries
            .get(&abs)
            .ok_or_else(|| ProviderError::UnknownPath(abs.clone()))?;
        Ok(ChildReport {
            path: abs,
            status: spec.status,
            is_dir: spec.is_dir,
        })
    }

    fn is_ignored(&self, root: &NormalizedPath, rel_path: &str) -> ProviderResult<bool> {
        let abs = Self::absolute(root, rel_path);
        Ok(self.read().ignored.contains(&abs))
    }

    fn ignore_rules_changed(
        &self,
        root: &NormalizedPath,
        _rel_path: &str,
    ) -> ProviderResult<bool> {
        Ok(self.read().ignore_changed.contains(root))
    }

    fn reload_ignore_rules(&self, root: &NormalizedPath, _rel_path: &str) -> ProviderResult<()> {
        self.write().ignore_changed.remove(root);
        Ok(())
    }

    fn head_revision(&self, root: &NormalizedPath) -> ProviderResult<RevisionId> {
        self.read()
            .heads
            .get(root)
            .cloned()
            .ok_or_else(|| ProviderError::NotARepository(root.clone()))
    }
}

impl WorktreeProbe for ScriptedWorktree {
    fn exists(&self, path: &NormalizedPath) -> bool {
        self.read()
            .entries
            .get(path)
            .map(|s| s.present)
            .unwrap_or(false)
    }

    fn is_directory(&self, path: &NormalizedPath) -> bool {
        self.read()
            .entries
            .get(path)
            .map(|s| s.present && s.is_dir)
            .unwrap_or(false)
    }

    fn fingerprint(&self, path: &NormalizedPath) -> Option<FileFingerprint> {
        let state = self.read();
        let spec = state.entries.get(path)?;
        if spec.present {
            spec.fingerprint
        } else {
            None
        }
    }

    fn repository_root(&self, path: &NormalizedPath) -> Option<NormalizedPath> {
        let state = self.read();
        let mut cursor = Some(path.clone());
        while let Some(p) = cursor {
            if state.roots.contains(&p) {
                return Some(p);
            }
            cursor = p.parent();
        }
        None
    }

    fn is_repository_root(&self, path: &NormalizedPath) -> bool {
        self.read().roots.contains(path)
    }

    fn is_admin_path(&self, path: &NormalizedPath) -> bool {
        path.as_str() == ".git"
            || path.as_str().ends_with("/.git")
            || path.as_str().contains("/.git/")
            || path.as_str().starts_with(".git/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(t: u64) -> FileFingerprint {
        FileFingerprint::new(t, false)
    }

    fn world() -> ScriptedWorktree {
        let w = ScriptedWorktree::new();
        w.add_repository("repo");
        w.add_dir("repo/src", StatusKind::Normal);
        w.add_file("repo/src/main.rs", StatusKind::Modified, fp(10));
        w.add_untracked_file("repo/scratch.txt", fp(20), false);
        w
    }

    #[test]
    fn enumerate_reports_immediate_children_only() {
        let w = world();
        let root = NormalizedPath::new("repo");
        let listing = w.enumerate_directory(&root, "").unwrap();
        let names: Vec<&str> = listing.children.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(names, vec!["repo/scratch.txt", "repo/src"]);
        assert_eq!(listing.status, StatusKind::Normal);
        assert_eq!(w.enumerate_count(&root), 1);
    }

    #[test]
    fn tracking_and_ignore_queries() {
        let w = world();
        let root = NormalizedPath::new("repo");
        assert!(w.is_under_version_control(&root, "src/main.rs", false).unwrap());
        assert!(!w.is_under_version_control(&root, "scratch.txt", false).unwrap());
        assert!(!w.is_ignored(&root, "scratch.txt").unwrap());
    }

    #[test]
    fn probe_walks_up_to_repository_root() {
        let w = world();
        let deep = NormalizedPath::new("repo/src/main.rs");
        assert_eq!(w.repository_root(&deep), Some(NormalizedPath::new("repo")));
        assert_eq!(w.repository_root(&NormalizedPath::new("elsewhere/x")), None);
        assert!(w.is_repository_root(&NormalizedPath::new("repo")));
        assert!(!w.is_repository_root(&NormalizedPath::new("repo/src")));
    }

    #[test]
    fn removed_paths_lose_presence_but_stay_enumerable() {
        let w = world();
        let file = NormalizedPath::new("repo/src/main.rs");
        assert!(w.exists(&file));
        w.remove_from_disk(&file);
        assert!(!w.exists(&file));
        assert_eq!(w.fingerprint(&file), None);

        let listing = w
            .enumerate_directory(&NormalizedPath::new("repo"), "src")
            .unwrap();
        assert_eq!(listing.children.len(), 1);
    }

    #[test]
    fn ignore_reload_clears_changed_flag() {
        let w = world();
        let root = NormalizedPath::new("repo");
        assert!(!w.ignore_rules_changed(&root, "").unwrap());
        w.mark_ignore_rules_changed(&root);
        assert!(w.ignore_rules_changed(&root, "").unwrap());
        w.reload_ignore_rules(&root, "").unwrap();
        assert!(!w.ignore_rules_changed(&root, "").unwrap());
    }

    #[test]
    fn admin_paths_detected() {
        let w = world();
        assert!(w.is_admin_path(&NormalizedPath::new("repo/.git")));
        assert!(w.is_admin_path(&NormalizedPath::new("repo/.git/config")));
        assert!(!w.is_admin_path(&NormalizedPath::new("repo/src")));
    }
}
