//! File freshness fingerprints.

use serde::{Deserialize, Serialize};

/// A cheap proxy for "has this file changed on disk".
///
/// Captures the last-write time and the read-only attribute at the moment a
/// status was computed. A cached entry is only trusted while the live
/// fingerprint is structurally equal to the cached one.
///
/// Note: a commit can leave the mtime unchanged while the status flips from
/// modified to normal, so a fingerprint match is a necessary but not
/// sufficient freshness signal. The cache layers a TTL on top.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// Last-write time, in the probe's tick domain (millis since epoch for
    /// the system probe).
    pub mtime_ticks: u64,
    /// Whether the file carried the read-only attribute.
    pub read_only: bool,
}

impl FileFingerprint {
    /// Create a fingerprint from raw parts.
    pub fn new(mtime_ticks: u64, read_only: bool) -> Self {
        Self {
            mtime_ticks,
            read_only,
        }
    }
}
