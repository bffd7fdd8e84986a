//! Hierarchical working-tree status cache.
//!
//! One [`DirectoryNode`] per directory holds the status of its immediate
//! file children, a summary per immediate child directory, and the
//! directory's own status, memoized into a single recursive aggregate.
//! Queries answer from the cache immediately; anything unknown or stale is
//! handed to the crawl queue and re-fetched through the provider in the
//! background. Status changes ripple upward node by node and stop at
//! repository boundaries, so an edit deep in a tree updates every ancestor
//! folder's badge without a full rescan.
//!
//! # Key Types
//!
//! - [`StatusCache`] — the node registry, crawl queue, and configuration
//! - [`DirectoryNode`] — one directory's entries, child summaries, and aggregate
//! - [`StatusEntry`] — one path's status plus freshness metadata
//! - [`ShellNotify`] — sink for change notifications
//! - [`TickSource`] — clock abstraction behind entry TTLs
//! - [`CacheError`] — provider failures and malformed snapshots

pub mod crawl;
pub mod entry;
pub mod error;
pub mod node;
pub mod registry;
pub mod snapshot;

pub use entry::StatusEntry;
pub use error::{CacheError, CacheResult};
pub use node::DirectoryNode;
pub use registry::{
    CacheConfig, ManualTicks, NullShell, RecordingShell, ShellNotify, StatusCache, SystemTicks,
    TickSource,
};
pub use snapshot::SNAPSHOT_VERSION;
