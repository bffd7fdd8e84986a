//! The node registry: arena, crawl queue, shell sink, and live config.
//!
//! [`StatusCache`] is an explicit handle passed into every node operation
//! that needs cross-node lookup, crawl scheduling, or shell notification.
//! There is no process-wide singleton: two caches in one process stay
//! fully independent.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use tracing::debug;
use treestat_provider::{StatusProvider, WorktreeProbe};
use treestat_types::NormalizedPath;

use crate::entry::StatusEntry;
use crate::error::{CacheError, CacheResult};
use crate::node::DirectoryNode;

/// Sink for shell change notifications.
///
/// Implementations may re-enter the cache; the cache therefore never holds
/// a node lock while calling this trait.
pub trait ShellNotify: Send + Sync {
    /// The externally visible status of `path` changed.
    fn status_changed(&self, path: &NormalizedPath);
}

/// A [`ShellNotify`] that drops all notifications.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullShell;

impl ShellNotify for NullShell {
    fn status_changed(&self, _path: &NormalizedPath) {}
}

/// A [`ShellNotify`] that records every notification, for tests asserting
/// the at-most-one-notification-per-transition property.
#[derive(Debug, Default)]
pub struct RecordingShell {
    notifications: Mutex<Vec<NormalizedPath>>,
}

impl RecordingShell {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications in arrival order.
    pub fn notifications(&self) -> Vec<NormalizedPath> {
        self.notifications.lock().expect("lock poisoned").clone()
    }

    /// Number of notifications recorded for one path.
    pub fn count_for(&self, path: &NormalizedPath) -> usize {
        self.notifications
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|p| *p == path)
            .count()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.notifications.lock().expect("lock poisoned").clear();
    }
}

impl ShellNotify for RecordingShell {
    fn status_changed(&self, path: &NormalizedPath) {
        self.notifications
            .lock()
            .expect("lock poisoned")
            .push(path.clone());
    }
}

/// Monotonic tick source for TTL bookkeeping.
///
/// Tick `0` is reserved as the "no TTL" sentinel on entries, so sources
/// must never report it.
pub trait TickSource: Send + Sync {
    /// The current tick.
    fn now_ticks(&self) -> u64;
}

/// Process-relative millisecond ticks, offset by 1 to keep tick 0 reserved.
#[derive(Debug)]
pub struct SystemTicks {
    start: Instant,
}

impl SystemTicks {
    /// Create a source anchored at the current instant.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for SystemTicks {
    fn now_ticks(&self) -> u64 {
        self.start.elapsed().as_millis() as u64 + 1
    }
}

/// A manually advanced tick source for tests.
#[derive(Debug)]
pub struct ManualTicks {
    now: AtomicU64,
}

impl ManualTicks {
    /// Create a source at the given tick (must be nonzero).
    pub fn new(start: u64) -> Self {
        debug_assert!(start != 0, "tick 0 is the no-TTL sentinel");
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move time forward.
    pub fn advance(&self, ticks: u64) {
        self.now.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Jump to an absolute tick.
    pub fn set(&self, tick: u64) {
        self.now.store(tick, Ordering::SeqCst);
    }
}

impl TickSource for ManualTicks {
    fn now_ticks(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Cache-wide configuration.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// TTL applied to freshly written entries, in ticks. `0` disables the
    /// TTL: entries then trust their fingerprint only.
    pub default_ttl_ticks: u64,
    /// Initial value of the live unversioned-as-modified flag.
    pub treat_unversioned_as_modified: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ticks: 0,
            treat_unversioned_as_modified: false,
        }
    }
}

struct CrawlQueue {
    queue: VecDeque<NormalizedPath>,
    queued: HashSet<NormalizedPath>,
}

/// The hierarchical status cache: an arena of [`DirectoryNode`]s keyed by
/// normalized path, plus the collaborators every node operation needs.
///
/// Nodes are created lazily on first lookup, never eagerly for a whole
/// tree, and are never destroyed by the core.
pub struct StatusCache {
    nodes: RwLock<HashMap<NormalizedPath, Arc<DirectoryNode>>>,
    crawl: Mutex<CrawlQueue>,
    provider: Arc<dyn StatusProvider>,
    probe: Arc<dyn WorktreeProbe>,
    shell: Arc<dyn ShellNotify>,
    ticks: Arc<dyn TickSource>,
    unversioned_as_modified: AtomicBool,
    config: CacheConfig,
}

impl StatusCache {
    /// Create a cache over the given collaborators.
    pub fn new(
        provider: Arc<dyn StatusProvider>,
        probe: Arc<dyn WorktreeProbe>,
        shell: Arc<dyn ShellNotify>,
        ticks: Arc<dyn TickSource>,
        config: CacheConfig,
    ) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            crawl: Mutex::new(CrawlQueue {
                queue: VecDeque::new(),
                queued: HashSet::new(),
            }),
            provider,
            probe,
            shell,
            ticks,
            unversioned_as_modified: AtomicBool::new(config.treat_unversioned_as_modified),
            config,
        }
    }

    /// The status provider.
    pub fn provider(&self) -> &dyn StatusProvider {
        &*self.provider
    }

    /// The worktree probe.
    pub fn probe(&self) -> &dyn WorktreeProbe {
        &*self.probe
    }

    /// The current tick.
    pub fn now(&self) -> u64 {
        self.ticks.now_ticks()
    }

    /// Expiry tick for a freshly written entry (`0` when TTLs are off).
    pub fn entry_expiry(&self) -> u64 {
        if self.config.default_ttl_ticks == 0 {
            0
        } else {
            self.now() + self.config.default_ttl_ticks
        }
    }

    /// Live configuration: treat unversioned files as modified in folder
    /// summaries.
    pub fn treat_unversioned_as_modified(&self) -> bool {
        self.unversioned_as_modified.load(Ordering::Relaxed)
    }

    /// Toggle the unversioned-as-modified flag at runtime.
    pub fn set_treat_unversioned_as_modified(&self, value: bool) {
        self.unversioned_as_modified.store(value, Ordering::Relaxed);
    }

    /// Look up the node for a directory, creating a watched node on first
    /// sight.
    pub fn lookup_or_create(&self, path: &NormalizedPath) -> Arc<DirectoryNode> {
        self.lookup_or_create_inner(path, true)
    }

    /// Look up the node for a directory, creating an unwatched node on
    /// first sight (used for untracked directories, whose subtrees are not
    /// worth crawling).
    pub fn lookup_or_create_unwatched(&self, path: &NormalizedPath) -> Arc<DirectoryNode> {
        self.lookup_or_create_inner(path, false)
    }

    fn lookup_or_create_inner(&self, path: &NormalizedPath, recursive: bool) -> Arc<DirectoryNode> {
        if let Some(node) = self.lookup_existing(path) {
            return node;
        }
        let mut nodes = self.nodes.write().expect("lock poisoned");
        nodes
            .entry(path.clone())
            .or_insert_with(|| {
                debug!(path = %path, recursive, "creating cache node");
                Arc::new(DirectoryNode::new(path.clone(), recursive))
            })
            .clone()
    }

    /// Look up a node without creating it.
    pub fn lookup_existing(&self, path: &NormalizedPath) -> Option<Arc<DirectoryNode>> {
        self.nodes.read().expect("lock poisoned").get(path).cloned()
    }

    /// Number of nodes in the arena.
    pub fn node_count(&self) -> usize {
        self.nodes.read().expect("lock poisoned").len()
    }

    /// All node paths, sorted. Used by snapshot save and tests.
    pub fn node_paths(&self) -> Vec<NormalizedPath> {
        let mut paths: Vec<NormalizedPath> = self
            .nodes
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    /// Insert a restored node, replacing any node already at its path.
    pub(crate) fn restore_node(&self, node: Arc<DirectoryNode>) {
        self.nodes
            .write()
            .expect("lock poisoned")
            .insert(node.path().clone(), node);
    }

    /// Schedule an asynchronous crawl of a directory. Idempotent: paths
    /// already queued are not queued twice.
    pub fn enqueue_crawl(&self, path: NormalizedPath) {
        let mut crawl = self.crawl.lock().expect("lock poisoned");
        if crawl.queued.insert(path.clone()) {
            debug!(path = %path, "crawl scheduled");
            crawl.queue.push_back(path);
        }
    }

    /// Take the next crawl request, if any.
    pub fn pop_crawl(&self) -> Option<NormalizedPath> {
        let mut crawl = self.crawl.lock().expect("lock poisoned");
        let path = crawl.queue.pop_front()?;
        crawl.queued.remove(&path);
        Some(path)
    }

    /// Number of pending crawl requests.
    pub fn pending_crawls(&self) -> usize {
        self.crawl.lock().expect("lock poisoned").queue.len()
    }

    /// Notify the shell sink about a status transition.
    pub fn notify_shell(&self, path: &NormalizedPath) {
        debug!(path = %path, "shell notification");
        self.shell.status_changed(path);
    }

    /// Cache-first status query: returns the best immediately available
    /// answer and schedules background work on misses. Never blocks on a
    /// repository scan.
    pub fn status(&self, path: &NormalizedPath, recursive: bool) -> CacheResult<StatusEntry> {
        let node = self.node_for_query(path)?;
        node.status_for_member(self, path, recursive, false)
    }

    /// Provider-backed fetch, used by crawl workers. May block on the
    /// provider.
    pub fn fetch_status(&self, path: &NormalizedPath, recursive: bool) -> CacheResult<StatusEntry> {
        let node = self.node_for_query(path)?;
        node.status_for_member(self, path, recursive, true)
    }

    /// Revalidate a directory's entries against the live filesystem,
    /// re-fetching everything expired or out of sync.
    pub fn refresh(&self, path: &NormalizedPath, recursive: bool) -> CacheResult<()> {
        let node = self.lookup_or_create(path);
        node.refresh_status(self, recursive)
    }

    /// Force the node at `path` to be revalidated on its next query.
    pub fn invalidate(&self, path: &NormalizedPath) {
        if let Some(node) = self.lookup_existing(path) {
            node.invalidate();
        }
    }

    fn node_for_query(&self, path: &NormalizedPath) -> CacheResult<Arc<DirectoryNode>> {
        let dir = if self.probe.is_directory(path) {
            path.clone()
        } else {
            path.parent()
                .ok_or_else(|| CacheError::InvalidPath(path.to_string()))?
        };
        Ok(self.lookup_or_create(&dir))
    }
}

impl std::fmt::Debug for StatusCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusCache")
            .field("nodes", &self.node_count())
            .field("pending_crawls", &self.pending_crawls())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use treestat_provider::ScriptedWorktree;

    fn cache_over(world: Arc<ScriptedWorktree>) -> StatusCache {
        StatusCache::new(
            world.clone(),
            world,
            Arc::new(NullShell),
            Arc::new(ManualTicks::new(1)),
            CacheConfig::default(),
        )
    }

    #[test]
    fn nodes_are_created_lazily_and_reused() {
        let cache = cache_over(Arc::new(ScriptedWorktree::new()));
        assert_eq!(cache.node_count(), 0);

        let path = NormalizedPath::new("repo/src");
        let a = cache.lookup_or_create(&path);
        let b = cache.lookup_or_create(&path);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.node_count(), 1);
        assert!(cache.lookup_existing(&NormalizedPath::new("repo")).is_none());
    }

    #[test]
    fn crawl_enqueue_is_idempotent() {
        let cache = cache_over(Arc::new(ScriptedWorktree::new()));
        let path = NormalizedPath::new("repo/src");
        cache.enqueue_crawl(path.clone());
        cache.enqueue_crawl(path.clone());
        assert_eq!(cache.pending_crawls(), 1);
        assert_eq!(cache.pop_crawl(), Some(path.clone()));
        assert_eq!(cache.pop_crawl(), None);

        // Once popped, the same path may be queued again.
        cache.enqueue_crawl(path);
        assert_eq!(cache.pending_crawls(), 1);
    }

    #[test]
    fn unversioned_as_modified_is_live() {
        let cache = cache_over(Arc::new(ScriptedWorktree::new()));
        assert!(!cache.treat_unversioned_as_modified());
        cache.set_treat_unversioned_as_modified(true);
        assert!(cache.treat_unversioned_as_modified());
    }

    #[test]
    fn manual_ticks_advance() {
        let ticks = ManualTicks::new(5);
        assert_eq!(ticks.now_ticks(), 5);
        ticks.advance(10);
        assert_eq!(ticks.now_ticks(), 15);
        ticks.set(100);
        assert_eq!(ticks.now_ticks(), 100);
    }

    #[test]
    fn system_ticks_never_zero() {
        assert!(SystemTicks::new().now_ticks() >= 1);
    }

    #[test]
    fn recording_shell_counts_per_path() {
        let shell = RecordingShell::new();
        let a = NormalizedPath::new("repo/a");
        let b = NormalizedPath::new("repo/b");
        shell.status_changed(&a);
        shell.status_changed(&a);
        shell.status_changed(&b);
        assert_eq!(shell.count_for(&a), 2);
        assert_eq!(shell.count_for(&b), 1);
        assert_eq!(shell.notifications().len(), 3);
    }
}
