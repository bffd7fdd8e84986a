//! Foundation types for treestat.
//!
//! This crate provides the status ordering, path keying, and freshness
//! primitives used throughout the treestat workspace. Every other treestat
//! crate depends on `treestat-types`.
//!
//! # Key Types
//!
//! - [`StatusKind`] — Ordered version-control status enumeration with [`merge`]
//! - [`NormalizedPath`] — Spelling-preserving path with a case-insensitive key
//! - [`FileFingerprint`] — (mtime, read-only) pair for change detection

pub mod error;
pub mod fingerprint;
pub mod path;
pub mod status;

pub use error::TypeError;
pub use fingerprint::FileFingerprint;
pub use path::NormalizedPath;
pub use status::{merge, StatusKind};
