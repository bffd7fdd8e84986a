//! External-collaborator contracts for the treestat cache.
//!
//! The cache itself never walks a repository. Everything it needs from the
//! outside world comes through two seams defined here:
//!
//! - [`StatusProvider`] — raw version-control status: classification,
//!   directory enumeration, ignore rules, head revision.
//! - [`WorktreeProbe`] — OS-level facts: existence, file fingerprints,
//!   repository-root discovery.
//!
//! # Key Types
//!
//! - [`StatusProvider`] / [`WorktreeProbe`] — the trait seams
//! - [`RawStatus`] — folded (text, property) status as reported by a provider
//! - [`ChildReport`] / [`DirectoryListing`] — enumeration results as values
//! - [`ScriptedWorktree`] — in-memory implementation of both seams for tests
//! - [`SystemWorktreeProbe`] — `std::fs`-backed probe

pub mod error;
pub mod scripted;
pub mod system;
pub mod traits;

pub use error::{ProviderError, ProviderResult};
pub use scripted::ScriptedWorktree;
pub use system::SystemWorktreeProbe;
pub use traits::{
    ChildReport, DirectoryListing, RawStatus, RevisionId, StatusProvider, WorktreeProbe,
};
