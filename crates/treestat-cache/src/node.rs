//! The per-directory cache node and its aggregation protocol.
//!
//! A [`DirectoryNode`] owns the status map for its immediate file children,
//! a summary of each immediate child directory, its own status, and two
//! memoized folds. Queries answer cache-first and never block on a
//! repository scan; the provider-backed fetch path is only entered by crawl
//! workers.
//!
//! Locking: each node guards its state with its own mutex and never holds
//! it while calling the provider, the probe, the shell sink, or another
//! node's lock. Upward propagation therefore acquires at most one node
//! lock at a time.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;
use treestat_provider::{ChildReport, RawStatus};
use treestat_types::{merge, NormalizedPath, StatusKind};

use crate::entry::StatusEntry;
use crate::error::CacheResult;
use crate::registry::StatusCache;

pub(crate) struct NodeState {
    /// Immediate file children, keyed by relative key (lower-cased suffix,
    /// no leading separator).
    pub(crate) entry_cache: BTreeMap<String, StatusEntry>,
    /// Last-reported aggregate of each immediate child directory.
    pub(crate) child_directories: BTreeMap<NormalizedPath, StatusKind>,
    /// This directory's own state.
    pub(crate) own_status: StatusEntry,
    /// Memoized fold over `entry_cache` values only.
    pub(crate) most_important_file_status: StatusKind,
    /// Memoized fold over own status, file fold, and child aggregates; the
    /// externally visible recursive status.
    pub(crate) current_full_status: StatusKind,
}

impl NodeState {
    fn new() -> Self {
        Self {
            entry_cache: BTreeMap::new(),
            child_directories: BTreeMap::new(),
            own_status: StatusEntry::default(),
            most_important_file_status: StatusKind::None,
            current_full_status: StatusKind::None,
        }
    }

    /// The pure fold: own status, file fold, and every
    /// child directory summary.
    fn recursive_fold(&self) -> StatusKind {
        let mut folded = merge(
            self.most_important_file_status,
            self.own_status.effective(),
        );
        for child_status in self.child_directories.values() {
            folded = merge(folded, *child_status);
        }
        folded
    }
}

/// One directory's cache node.
///
/// Created lazily by the registry on first lookup; never destroyed by the
/// core. All cross-node traffic goes through the [`StatusCache`] handle
/// passed into each operation.
pub struct DirectoryNode {
    path: NormalizedPath,
    /// Whether this node's subtree should be watched and crawled.
    recursive: bool,
    state: Mutex<NodeState>,
}

impl DirectoryNode {
    pub(crate) fn new(path: NormalizedPath, recursive: bool) -> Self {
        Self {
            path,
            recursive,
            state: Mutex::new(NodeState::new()),
        }
    }

    pub(crate) fn from_parts(
        path: NormalizedPath,
        entry_cache: BTreeMap<String, StatusEntry>,
        child_directories: BTreeMap<NormalizedPath, StatusKind>,
        own_status: StatusEntry,
        current_full_status: StatusKind,
        most_important_file_status: StatusKind,
    ) -> Self {
        Self {
            path,
            recursive: true,
            state: Mutex::new(NodeState {
                entry_cache,
                child_directories,
                own_status,
                most_important_file_status,
                current_full_status,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().expect("lock poisoned")
    }

    /// This node's directory path.
    pub fn path(&self) -> &NormalizedPath {
        &self.path
    }

    /// Whether this node's subtree is watched.
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// The externally visible recursive status.
    pub fn current_full_status(&self) -> StatusKind {
        self.lock().current_full_status
    }

    /// The memoized fold over file entries only.
    pub fn most_important_file_status(&self) -> StatusKind {
        self.lock().most_important_file_status
    }

    /// A copy of this directory's own status record.
    pub fn own_status_snapshot(&self) -> StatusEntry {
        self.lock().own_status
    }

    /// The file entries, as (relative key, entry) pairs.
    pub fn entry_snapshot(&self) -> Vec<(String, StatusEntry)> {
        self.lock()
            .entry_cache
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// The child-directory summaries.
    pub fn child_directory_statuses(&self) -> Vec<(NormalizedPath, StatusKind)> {
        self.lock()
            .child_directories
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Whether the own status can be served without a crawl.
    pub fn is_own_status_valid(&self, now: u64) -> bool {
        let state = self.lock();
        state.own_status.has_been_set() && !state.own_status.has_expired(now)
    }

    /// Force revalidation on the next query.
    pub fn invalidate(&self) {
        self.lock().own_status.invalidate();
    }

    /// Pure in-memory lookup of a member entry. No disk access, no
    /// scheduling.
    pub fn cached_member_status(&self, path: &NormalizedPath) -> Option<StatusEntry> {
        let key = self.path.relative_key(path)?;
        self.lock().entry_cache.get(&key).copied()
    }

    // ---------------------------------------------------------------
    // Query dispatch
    // ---------------------------------------------------------------

    /// Status of a member of this directory (or of the directory itself).
    ///
    /// With `fetch == false` this is the cache-first path: it returns the
    /// best immediately available answer and schedules background crawls
    /// on misses. With `fetch == true` it is the provider-backed path used
    /// by crawl workers and may block on the provider.
    pub fn status_for_member(
        &self,
        cache: &StatusCache,
        path: &NormalizedPath,
        recursive: bool,
        fetch: bool,
    ) -> CacheResult<StatusEntry> {
        let Some(root) = cache.probe().repository_root(path) else {
            // Not under version control: a representable non-answer.
            return Ok(StatusEntry::default());
        };
        if cache.probe().is_admin_path(path) {
            // Repository admin internals are never worth caching.
            return Ok(StatusEntry::default());
        }

        if fetch {
            self.status_from_provider(cache, path, &root)
        } else {
            self.status_from_cache(cache, path, recursive)
        }
    }

    /// Cache-first query: never touches the provider.
    fn status_from_cache(
        &self,
        cache: &StatusCache,
        path: &NormalizedPath,
        recursive: bool,
    ) -> CacheResult<StatusEntry> {
        if *path == self.path || cache.probe().is_directory(path) {
            // Directory statuses live on the directory's own node.
            let node = cache.lookup_or_create(path);
            if !node.is_own_status_valid(cache.now()) {
                // Out of date: crawl again, meanwhile serve the old status.
                cache.enqueue_crawl(path.clone());
            }
            return Ok(node.own_status_entry(cache, recursive));
        }

        // Every file below an ignored or unversioned directory inherits
        // that classification without a map lookup.
        let (own_effective, cached) = {
            let state = self.lock();
            let cached = self
                .path
                .relative_key(path)
                .and_then(|key| state.entry_cache.get(&key).copied());
            (state.own_status.effective(), cached)
        };
        match own_effective {
            StatusKind::Ignored => return Ok(StatusEntry::from_kind(StatusKind::Ignored)),
            StatusKind::Unversioned => {
                return Ok(StatusEntry::from_kind(StatusKind::Unversioned))
            }
            _ => {}
        }

        if let Some(entry) = cached {
            if self.entry_is_fresh(cache, &entry, path) {
                return Ok(entry);
            }
        }

        // Miss or stale: hand the containing directory to the crawler and
        // answer with the empty entry.
        cache.enqueue_crawl(self.path.clone());
        Ok(StatusEntry::default())
    }

    /// Authoritative-hit test: unexpired, fingerprint-matched, and not a
    /// stale "missing" claim for a file that is back on disk. A missing
    /// entry whose file truly cannot be stat'd remains a hit; its absence
    /// is the fingerprint match.
    fn entry_is_fresh(
        &self,
        cache: &StatusCache,
        entry: &StatusEntry,
        path: &NormalizedPath,
    ) -> bool {
        if entry.has_expired(cache.now()) {
            return false;
        }
        match cache.probe().fingerprint(path) {
            Some(live) => {
                entry.fingerprint_matches(&live)
                    && (entry.effective() != StatusKind::Missing || !cache.probe().exists(path))
            }
            None => entry.effective() == StatusKind::Missing && !cache.probe().exists(path),
        }
    }

    /// Provider-backed fetch.
    fn status_from_provider(
        &self,
        cache: &StatusCache,
        path: &NormalizedPath,
        root: &NormalizedPath,
    ) -> CacheResult<StatusEntry> {
        let rel = root.relative_key(path).unwrap_or_default();
        let head = cache.provider().head_revision(root)?;
        debug!(path = %path, head = %head, "provider fetch");

        let is_dir = *path == self.path || cache.probe().is_directory(path);
        let tracked = cache
            .provider()
            .is_under_version_control(root, &rel, is_dir)?;

        if !tracked {
            return self.classify_untracked(cache, path, root, &rel, is_dir);
        }

        self.enum_files(cache, path, root)?;
        self.update_current_status(cache);
        if is_dir {
            Ok(self.own_status_snapshot())
        } else {
            // The enumeration wrote the member entry; serve it.
            Ok(self.cached_member_status(path).unwrap_or_default())
        }
    }

    /// Untracked paths resolve to unversioned or ignored, reloading the
    /// ignore rules first when they changed.
    fn classify_untracked(
        &self,
        cache: &StatusCache,
        path: &NormalizedPath,
        root: &NormalizedPath,
        rel: &str,
        is_dir: bool,
    ) -> CacheResult<StatusEntry> {
        let ignore_changed = cache.provider().ignore_rules_changed(root, rel)?;
        if ignore_changed {
            cache.provider().reload_ignore_rules(root, rel)?;
        }

        if is_dir {
            // Untracked directories are not worth watching.
            let node = cache.lookup_or_create_unwatched(path);
            let dir_status = node.current_full_status();
            if dir_status == StatusKind::None
                || dir_status >= StatusKind::Normal
                || ignore_changed
            {
                let kind = if cache.provider().is_ignored(root, rel)? {
                    StatusKind::Ignored
                } else {
                    StatusKind::Unversioned
                };
                let mut state = node.lock();
                state.own_status.set_status(RawStatus::uniform(kind), None, None);
                state.own_status.mark_directory();
            }
            return Ok(node.own_status_snapshot());
        }

        let Some(key) = self.path.relative_key(path) else {
            return Ok(StatusEntry::default());
        };
        let have_entry = self.lock().entry_cache.contains_key(&key);
        if !have_entry || ignore_changed {
            let kind = if cache.provider().is_ignored(root, rel)? {
                StatusKind::Ignored
            } else {
                StatusKind::Unversioned
            };
            self.add_entry(cache, path, Some(RawStatus::uniform(kind)), false)?;
        }
        Ok(self
            .lock()
            .entry_cache
            .get(&key)
            .copied()
            .unwrap_or_default())
    }

    // ---------------------------------------------------------------
    // Enumeration and the provider's callback contract
    // ---------------------------------------------------------------

    /// Run a full provider enumeration for `path` and fold every reported
    /// child into the cache.
    fn enum_files(
        &self,
        cache: &StatusCache,
        path: &NormalizedPath,
        root: &NormalizedPath,
    ) -> CacheResult<()> {
        let rel = root.relative_key(path).unwrap_or_default();
        debug!(path = %path, "enumerating directory");

        if *path != self.path && !cache.probe().is_directory(path) {
            let report = cache.provider().file_status(root, &rel)?;
            return self.dispatch_report(cache, report);
        }

        self.lock().most_important_file_status = StatusKind::None;
        let listing = cache.provider().enumerate_directory(root, &rel)?;
        for report in listing.children {
            self.dispatch_report(cache, report)?;
        }

        // Folders are never shown added or deleted, and a missing
        // directory status must still mark the parent fold even when no
        // child report carried it.
        let dir_status = listing.status.fold_for_directory();
        let mut notify_root = false;
        {
            let mut state = self.lock();
            state.most_important_file_status =
                merge(state.most_important_file_status, dir_status);

            if rel.is_empty() {
                // A working-tree root examined for the first time.
                if state.current_full_status == StatusKind::None {
                    state.current_full_status = StatusKind::Normal;
                    notify_root = true;
                }
                state.own_status.set_status(
                    RawStatus::uniform(StatusKind::Normal),
                    None,
                    None,
                );
                state.own_status.mark_directory();
            } else if matches!(
                state.own_status.effective(),
                StatusKind::Ignored | StatusKind::Conflicted
            ) {
                // Folders holding an ignored item, or once shown
                // conflicted, would never recover without this reset.
                state.own_status.force_status(StatusKind::Normal);
            }
        }
        if notify_root {
            cache.notify_shell(&self.path);
        }
        Ok(())
    }

    /// Route a provider report to the node owning the reported path.
    fn dispatch_report(&self, cache: &StatusCache, report: ChildReport) -> CacheResult<()> {
        let Some(parent_path) = report.path.parent() else {
            return Ok(());
        };
        let node = if parent_path == self.path {
            None // avoid a registry round-trip for the common case
        } else {
            Some(cache.lookup_or_create(&parent_path))
        };
        match node {
            Some(node) => node.report_child_status(cache, &report),
            None => self.report_child_status(cache, &report),
        }
    }

    /// Fold one discovered child into this node.
    pub fn report_child_status(
        &self,
        cache: &StatusCache,
        report: &ChildReport,
    ) -> CacheResult<()> {
        let effective = report.status.effective();

        if report.is_dir {
            if !cache.probe().exists(&report.path) {
                // A deleted subdirectory must still mark us modified.
                debug!(path = %report.path, "reported directory is gone");
                let mut state = self.lock();
                state.most_important_file_status =
                    merge(state.most_important_file_status, StatusKind::Deleted);
            }

            if effective < StatusKind::Normal && cache.probe().is_repository_root(&report.path) {
                // Nested repository: status does not cross the boundary.
                debug!(path = %report.path, "skipping nested repository");
                return Ok(());
            }

            if self.recursive && effective >= StatusKind::Normal {
                cache.enqueue_crawl(report.path.clone());
            }

            let summary = effective.fold_for_directory();
            match cache.lookup_existing(&report.path) {
                Some(child) => {
                    // Already cached: its recursive status wins over the
                    // plain report.
                    let summary = merge(summary, child.current_full_status());
                    self.lock()
                        .child_directories
                        .insert(report.path.clone(), summary);
                }
                None => {
                    // Seed a node; the crawl scheduled above will firm it
                    // up shortly.
                    cache.lookup_or_create(&report.path);
                    self.lock()
                        .child_directories
                        .insert(report.path.clone(), summary);
                }
            }
        } else {
            let unversioned_as_modified = cache.treat_unversioned_as_modified();
            let mut state = self.lock();
            if matches!(effective, StatusKind::Added | StatusKind::Deleted) {
                // A single added or deleted file shows the folder as
                // modified, not added/deleted.
                state.most_important_file_status =
                    merge(state.most_important_file_status, StatusKind::Modified);
            } else {
                state.most_important_file_status =
                    merge(state.most_important_file_status, report.status.text);
                state.most_important_file_status =
                    merge(state.most_important_file_status, report.status.prop);
                if report.status.text == StatusKind::Unversioned
                    && unversioned_as_modified
                    && state.most_important_file_status != StatusKind::Added
                {
                    state.most_important_file_status =
                        merge(state.most_important_file_status, StatusKind::Modified);
                }
            }
        }

        self.add_entry(cache, &report.path, Some(report.status), report.is_dir)
    }

    // ---------------------------------------------------------------
    // Mutation choke-point
    // ---------------------------------------------------------------

    /// Record one path's status. The single choke-point all mutations
    /// flow through; shell notifications fire on transition only, after
    /// every lock is released.
    pub fn add_entry(
        &self,
        cache: &StatusCache,
        path: &NormalizedPath,
        status: Option<RawStatus>,
        is_dir: bool,
    ) -> CacheResult<()> {
        let mut notifications: Vec<NormalizedPath> = Vec::new();

        if is_dir {
            let child = cache.lookup_or_create(path);
            let child_full = child.current_full_status();
            let blocked = child_full == StatusKind::Missing
                && status.map(|s| s.text) == Some(StatusKind::Unversioned);
            if !blocked {
                if let Some(raw) = status {
                    let mut state = child.lock();
                    if state.own_status.effective() != raw.effective() {
                        state
                            .own_status
                            .set_status(raw, None, Some(cache.entry_expiry()));
                        notifications.push(path.clone());
                    }
                }
            }
            child.lock().own_status.mark_directory();
        } else if let Some(parent_path) = path.parent() {
            let dir = if parent_path == self.path {
                None
            } else {
                Some(cache.lookup_or_create(&parent_path))
            };
            let dir: &DirectoryNode = dir.as_deref().unwrap_or(self);
            if let Some(key) = parent_path.relative_key(path) {
                let fingerprint = cache.probe().fingerprint(path);
                let entry = StatusEntry::new_file(
                    status.unwrap_or_default(),
                    fingerprint,
                    cache.entry_expiry(),
                );
                let mut notify = false;
                {
                    let mut state = dir.lock();
                    match state.entry_cache.get(&key) {
                        Some(previous) => {
                            if let Some(raw) = status {
                                if previous.effective() > StatusKind::None
                                    && previous.effective() != raw.effective()
                                {
                                    notify = true;
                                }
                            }
                        }
                        None => notify = true,
                    }
                    state.entry_cache.insert(key, entry);
                }
                if notify {
                    notifications.push(path.clone());
                }
            }
        }

        // First hop of upward propagation: escalate the parent's own
        // status when the new merged status outranks its aggregate.
        // Deeper hops run through update_current_status.
        if let Some(parent_path) = path.parent().filter(|p| !p.is_root()) {
            if let Some(raw) = status {
                let parent = cache.lookup_or_create(&parent_path);
                let parent_full = parent.current_full_status();
                let blocked = parent_full == StatusKind::Missing
                    && raw.text == StatusKind::Unversioned;
                if !blocked && parent_full < raw.effective() {
                    parent
                        .lock()
                        .own_status
                        .set_status(raw, None, Some(cache.entry_expiry()));
                    parent.lock().own_status.mark_directory();
                    notifications.push(parent_path);
                }
            }
        }

        for path in notifications {
            cache.notify_shell(&path);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Aggregation and propagation
    // ---------------------------------------------------------------

    /// Recompute the memoized aggregate and push it to the parent.
    pub fn update_current_status(&self, cache: &StatusCache) {
        let is_repo_root = cache.probe().is_repository_root(&self.path);
        let mut notify_self = false;
        let current;
        {
            let mut state = self.lock();
            if state.own_status.effective() < StatusKind::Normal && is_repo_root {
                // A repository root must never be reported as absent.
                debug!(path = %self.path, "forcing repository root to normal");
                state.own_status.force_status(StatusKind::Normal);
                state.own_status.mark_directory();
            }

            let new_status = state.recursive_fold();
            let own_effective = state.own_status.effective();
            if new_status != state.current_full_status && state.own_status.is_versioned() {
                // Suppress the very first computation and sticky-missing
                // directories; everything else is a visible transition.
                if state.current_full_status != StatusKind::None
                    && own_effective != StatusKind::Missing
                {
                    notify_self = true;
                }
            }
            state.current_full_status = if own_effective == StatusKind::Missing {
                StatusKind::Missing
            } else {
                new_status
            };
            current = state.current_full_status;
        }
        if notify_self {
            debug!(path = %self.path, status = ?current, "aggregate changed");
            cache.notify_shell(&self.path);
        }

        // Always tell the parent, changed or not; it decides for itself.
        // Propagation stops at repository boundaries.
        let Some(parent_path) = self.path.parent() else {
            return;
        };
        let same_repository = match (
            cache.probe().repository_root(&parent_path),
            cache.probe().repository_root(&self.path),
        ) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        if same_repository {
            let parent = cache.lookup_or_create(&parent_path);
            parent.update_child_directory_status(cache, &self.path, current);
        }
    }

    /// Receive a child's aggregate and recompute if it brings news. This
    /// is the recursive step of the upward wave; it terminates because
    /// every hop is strictly closer to the root.
    pub fn update_child_directory_status(
        &self,
        cache: &StatusCache,
        child: &NormalizedPath,
        child_status: StatusKind,
    ) {
        let needs_update = {
            let state = self.lock();
            let recorded = state
                .child_directories
                .get(child)
                .copied()
                .unwrap_or(StatusKind::None);
            recorded != child_status
                || !(state.own_status.has_been_set()
                    && !state.own_status.has_expired(cache.now()))
        };
        if needs_update {
            self.lock()
                .child_directories
                .insert(child.clone(), child_status);
            self.update_current_status(cache);
        }
    }

    /// This directory's own (or recursive) status as a servable entry.
    pub fn own_status_entry(&self, cache: &StatusCache, recursive: bool) -> StatusEntry {
        let own = self.own_status_snapshot();
        // Unversioned/ignored directories have no recursive status.
        if recursive && own.is_versioned() {
            self.update_current_status(cache);
            let current = {
                let mut state = self.lock();
                state.current_full_status = state.current_full_status.fold_for_directory();
                state.current_full_status
            };
            let mut entry = own;
            entry.force_status(current);
            entry
        } else {
            own
        }
    }

    // ---------------------------------------------------------------
    // Consistency sweeps
    // ---------------------------------------------------------------

    /// Revalidate every file entry against the live filesystem.
    ///
    /// Re-fetching mutates `entry_cache` underneath the sweep, so this is
    /// a worklist: snapshot the unvisited keys, re-fetch the first stale
    /// one, then re-snapshot. Every key is visited at most once, bounding
    /// the sweep at `|entry_cache|` re-fetch rounds.
    pub fn refresh_status(&self, cache: &StatusCache, recursive: bool) -> CacheResult<()> {
        // Make sure our own status is up to date first.
        self.status_for_member(cache, &self.path, recursive, true)?;

        let now = cache.now();
        let mut visited: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        loop {
            let pending: Vec<(String, StatusEntry)> = {
                let state = self.lock();
                state
                    .entry_cache
                    .iter()
                    .filter(|(key, _)| !visited.contains(*key))
                    .map(|(key, entry)| (key.clone(), *entry))
                    .collect()
            };
            if pending.is_empty() {
                return Ok(());
            }

            let mut refetched = false;
            for (key, entry) in pending {
                visited.insert(key.clone());
                let member = self.path.join(&key);
                if member == self.path {
                    continue;
                }
                if !self.entry_is_fresh(cache, &entry, &member) {
                    debug!(path = %member, "stale entry, re-fetching");
                    self.status_for_member(cache, &member, recursive, true)?;
                    // The map may have been rewritten; restart the sweep.
                    refetched = true;
                    break;
                }
                if recursive && entry.is_directory() {
                    // Crawl valid subfolders too, or a change deep in the
                    // tree never propagates up.
                    cache.enqueue_crawl(member);
                }
            }
            if !refetched {
                return Ok(());
            }
        }
    }

    /// Local-only refold of the file summary.
    /// Touches neither the filesystem nor the provider.
    pub fn refresh_most_important(&self, cache: &StatusCache) {
        let unversioned_as_modified = cache.treat_unversioned_as_modified();
        let changed = {
            let mut state = self.lock();
            let mut new_status = state.own_status.effective();
            for entry in state.entry_cache.values() {
                new_status = merge(new_status, entry.effective());
                if matches!(
                    entry.effective(),
                    StatusKind::Unversioned | StatusKind::None
                ) && unversioned_as_modified
                    && new_status != StatusKind::Added
                {
                    new_status = merge(new_status, StatusKind::Modified);
                }
            }
            let changed = new_status != state.most_important_file_status;
            state.most_important_file_status = new_status;
            changed
        };
        if changed {
            cache.notify_shell(&self.path);
        }
    }
}


impl std::fmt::Debug for DirectoryNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("DirectoryNode")
            .field("path", &self.path)
            .field("entries", &state.entry_cache.len())
            .field("children", &state.child_directories.len())
            .field("own", &state.own_status.effective())
            .field("full", &state.current_full_status)
            .finish()
    }
}
