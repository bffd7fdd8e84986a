//! Foreground draining of the background crawl queue.
//!
//! The cache only ever schedules crawls; running them is the embedder's
//! job, typically from one or more worker threads that call
//! [`StatusCache::drain_crawls`] whenever the queue is non-empty.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::registry::StatusCache;

impl StatusCache {
    /// Run every pending crawl to completion, including crawls scheduled
    /// by the crawls themselves. Returns the number of directories
    /// fetched.
    ///
    /// A path is fetched at most once per drain, so a directory that
    /// re-schedules itself (a missing directory does, every time its
    /// parent re-discovers it) cannot spin the loop.
    pub fn drain_crawls(&self) -> usize {
        let mut seen: HashSet<_> = HashSet::new();
        let mut fetched = 0;
        while let Some(path) = self.pop_crawl() {
            if !seen.insert(path.clone()) {
                continue;
            }
            debug!(path = %path, "crawling");
            match self.fetch_status(&path, true) {
                Ok(_) => fetched += 1,
                Err(err) => {
                    // A failed crawl leaves the old answer in place; the
                    // next query will schedule another attempt.
                    warn!(path = %path, error = %err, "crawl failed");
                }
            }
        }
        fetched
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use treestat_provider::ScriptedWorktree;
    use treestat_types::{FileFingerprint, NormalizedPath, StatusKind};

    use crate::registry::{CacheConfig, ManualTicks, NullShell, StatusCache};

    fn p(s: &str) -> NormalizedPath {
        NormalizedPath::new(s)
    }

    fn fp(t: u64) -> FileFingerprint {
        FileFingerprint::new(t, false)
    }

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
    fn miss_then_drain_then_hit() {
        let world = Arc::new(ScriptedWorktree::new());
        world.add_repository("repo");
        world.add_dir("repo/d", StatusKind::Normal);
        world.add_file("repo/d/a.txt", StatusKind::Modified, fp(10));
        let cache = cache_over(world.clone());

        let miss = cache.status(&p("repo/d/a.txt"), false).unwrap();
        assert!(!miss.has_been_set());
        assert_eq!(cache.pending_crawls(), 1);

        assert_eq!(cache.drain_crawls(), 1);

        let hit = cache.status(&p("repo/d/a.txt"), false).unwrap();
        assert_eq!(hit.effective(), StatusKind::Modified);
        assert_eq!(cache.pending_crawls(), 0);
        assert_eq!(world.enumerate_count(&p("repo/d")), 1);
    }

    #[test]
    fn crawls_discover_and_descend_into_subdirectories() {
        let world = Arc::new(ScriptedWorktree::new());
        world.add_repository("repo");
        world.add_dir("repo/d", StatusKind::Normal);
        world.add_dir("repo/d/x", StatusKind::Normal);
        world.add_file("repo/d/x/f.txt", StatusKind::Modified, fp(1));
        let cache = cache_over(world);

        let first = cache.status(&p("repo/d"), true).unwrap();
        assert!(!first.has_been_set());
        assert_eq!(cache.drain_crawls(), 2);

        let answer = cache.status(&p("repo/d"), true).unwrap();
        assert_eq!(answer.effective(), StatusKind::Modified);

        let x = cache.lookup_existing(&p("repo/d/x")).unwrap();
        assert_eq!(x.current_full_status(), StatusKind::Modified);
        let repo = cache.lookup_existing(&p("repo")).unwrap();
        assert_eq!(repo.current_full_status(), StatusKind::Modified);
    }

    #[test]
    fn self_rescheduling_crawl_terminates() {
        let world = Arc::new(ScriptedWorktree::new());
        world.add_repository("repo");
        world.add_dir("repo/m", StatusKind::Missing);
        world.remove_from_disk(&p("repo/m"));
        let cache = cache_over(world);

        cache.fetch_status(&p("repo"), true).unwrap();
        assert_eq!(cache.pending_crawls(), 1);

        assert_eq!(cache.drain_crawls(), 1);
        assert_eq!(cache.pending_crawls(), 0);
    }
}
