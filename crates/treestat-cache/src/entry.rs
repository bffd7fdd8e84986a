//! The per-path status record with freshness metadata.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use treestat_provider::RawStatus;
use treestat_types::{FileFingerprint, StatusKind};

use crate::error::CacheResult;

/// `valid_until` sentinel meaning "no TTL, trust the fingerprint only".
const NO_TTL: u64 = 0;

/// `valid_until` value written by [`StatusEntry::invalidate`]: any live tick
/// is at least 1, so the entry reads as expired from then on.
const INVALIDATED: u64 = 1;

// Flag bits of the fixed-layout snapshot record.
const FLAG_DIRECTORY: u8 = 1 << 0;
const FLAG_ASSUME_VALID: u8 = 1 << 1;
const FLAG_SKIP_WORKTREE: u8 = 1 << 2;
const FLAG_HAS_FINGERPRINT: u8 = 1 << 3;
const FLAG_READ_ONLY: u8 = 1 << 4;

/// One path's last known status plus the metadata needed to decide whether
/// it can still be served authoritatively.
///
/// An entry is never partially written: every update replaces the whole
/// record under the owning node's lock. The default entry is the "no data"
/// state (`StatusKind::None`) returned on cache misses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    status: RawStatus,
    is_directory: bool,
    fingerprint: Option<FileFingerprint>,
    /// Absolute expiry tick; [`NO_TTL`] disables the TTL.
    valid_until: u64,
}

impl StatusEntry {
    /// A file entry as written by the mutation choke-point.
    pub fn new_file(
        status: RawStatus,
        fingerprint: Option<FileFingerprint>,
        valid_until: u64,
    ) -> Self {
        Self {
            status,
            is_directory: false,
            fingerprint,
            valid_until,
        }
    }

    /// An entry carrying only a kind, used for inherited classifications
    /// (e.g. files below an ignored directory).
    pub fn from_kind(kind: StatusKind) -> Self {
        Self {
            status: RawStatus::uniform(kind),
            ..Self::default()
        }
    }

    /// The folded (text, property) status.
    pub fn effective(&self) -> StatusKind {
        self.status.effective()
    }

    /// The raw provider-reported status.
    pub fn raw(&self) -> RawStatus {
        self.status
    }

    /// Whether this entry describes a directory.
    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// The fingerprint captured when the status was computed.
    pub fn fingerprint(&self) -> Option<FileFingerprint> {
        self.fingerprint
    }

    /// The absolute expiry tick (`0` = no TTL).
    pub fn valid_until(&self) -> u64 {
        self.valid_until
    }

    /// Whether any status has ever been recorded.
    pub fn has_been_set(&self) -> bool {
        self.effective() != StatusKind::None
    }

    /// Whether the recorded status describes a tracked path.
    pub fn is_versioned(&self) -> bool {
        self.effective().is_versioned()
    }

    /// True once the TTL has elapsed. Entries without a TTL never expire.
    pub fn has_expired(&self, now: u64) -> bool {
        self.valid_until != NO_TTL && now >= self.valid_until
    }

    /// Structural comparison against a live fingerprint. An entry without
    /// a recorded fingerprint never matches.
    pub fn fingerprint_matches(&self, live: &FileFingerprint) -> bool {
        self.fingerprint == Some(*live)
    }

    /// Replace status, flags, and fingerprint. The TTL is kept unless a
    /// new expiry tick is supplied.
    pub fn set_status(
        &mut self,
        status: RawStatus,
        fingerprint: Option<FileFingerprint>,
        valid_until: Option<u64>,
    ) {
        self.status = status;
        self.fingerprint = fingerprint;
        if let Some(tick) = valid_until {
            self.valid_until = tick;
        }
    }

    /// Override the effective kind only, keeping flags, fingerprint, and
    /// TTL. Used to normalize folder statuses.
    pub fn force_status(&mut self, kind: StatusKind) {
        self.status.text = kind;
        self.status.prop = kind;
    }

    /// Record that this entry describes a directory.
    pub fn mark_directory(&mut self) {
        self.is_directory = true;
    }

    /// Force the entry to read as expired until the next update.
    pub fn invalidate(&mut self) {
        self.valid_until = INVALIDATED;
    }

    /// Write the fixed-layout snapshot record.
    ///
    /// Layout: `u8` text kind, `u8` prop kind, `u8` flags, `u64` mtime
    /// ticks (LE), `u64` valid-until tick (LE).
    pub fn write_to<W: Write>(&self, writer: &mut W) -> CacheResult<()> {
        let mut flags = 0u8;
        if self.is_directory {
            flags |= FLAG_DIRECTORY;
        }
        if self.status.assume_valid {
            flags |= FLAG_ASSUME_VALID;
        }
        if self.status.skip_worktree {
            flags |= FLAG_SKIP_WORKTREE;
        }
        let mtime = match self.fingerprint {
            Some(fp) => {
                flags |= FLAG_HAS_FINGERPRINT;
                if fp.read_only {
                    flags |= FLAG_READ_ONLY;
                }
                fp.mtime_ticks
            }
            None => 0,
        };
        writer.write_all(&[self.status.text.as_u8(), self.status.prop.as_u8(), flags])?;
        writer.write_all(&mtime.to_le_bytes())?;
        writer.write_all(&self.valid_until.to_le_bytes())?;
        Ok(())
    }

    /// Read the fixed-layout snapshot record. Any short read or unknown
    /// discriminant fails the whole record.
    pub fn read_from<R: Read>(reader: &mut R) -> CacheResult<StatusEntry> {
        let mut head = [0u8; 3];
        reader.read_exact(&mut head)?;
        let text = StatusKind::from_u8(head[0])?;
        let prop = StatusKind::from_u8(head[1])?;
        let flags = head[2];
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        let mtime = u64::from_le_bytes(buf);
        reader.read_exact(&mut buf)?;
        let valid_until = u64::from_le_bytes(buf);

        let fingerprint = if flags & FLAG_HAS_FINGERPRINT != 0 {
            Some(FileFingerprint::new(mtime, flags & FLAG_READ_ONLY != 0))
        } else {
            None
        };
        Ok(StatusEntry {
            status: RawStatus {
                text,
                prop,
                assume_valid: flags & FLAG_ASSUME_VALID != 0,
                skip_worktree: flags & FLAG_SKIP_WORKTREE != 0,
            },
            is_directory: flags & FLAG_DIRECTORY != 0,
            fingerprint,
            valid_until,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;

    fn fp(t: u64) -> FileFingerprint {
        FileFingerprint::new(t, false)
    }

    #[test]
    fn default_entry_is_unset() {
        let entry = StatusEntry::default();
        assert_eq!(entry.effective(), StatusKind::None);
        assert!(!entry.has_been_set());
        assert!(!entry.is_versioned());
        assert!(!entry.has_expired(u64::MAX));
    }

    #[test]
    fn ttl_expiry() {
        let entry = StatusEntry::new_file(RawStatus::uniform(StatusKind::Normal), Some(fp(5)), 100);
        assert!(!entry.has_expired(99));
        assert!(entry.has_expired(100));
        assert!(entry.has_expired(5000));
    }

    #[test]
    fn no_ttl_never_expires() {
        let entry = StatusEntry::new_file(RawStatus::uniform(StatusKind::Normal), Some(fp(5)), 0);
        assert!(!entry.has_expired(u64::MAX));
    }

    #[test]
    fn fingerprint_comparison() {
        let entry = StatusEntry::new_file(RawStatus::uniform(StatusKind::Normal), Some(fp(7)), 0);
        assert!(entry.fingerprint_matches(&fp(7)));
        assert!(!entry.fingerprint_matches(&fp(8)));
        assert!(!entry.fingerprint_matches(&FileFingerprint::new(7, true)));

        let unset = StatusEntry::default();
        assert!(!unset.fingerprint_matches(&fp(7)));
    }

    #[test]
    fn set_status_keeps_ttl_unless_requested() {
        let mut entry =
            StatusEntry::new_file(RawStatus::uniform(StatusKind::Normal), Some(fp(1)), 500);
        entry.set_status(RawStatus::uniform(StatusKind::Modified), Some(fp(2)), None);
        assert_eq!(entry.effective(), StatusKind::Modified);
        assert_eq!(entry.valid_until(), 500);

        entry.set_status(RawStatus::uniform(StatusKind::Normal), Some(fp(3)), Some(900));
        assert_eq!(entry.valid_until(), 900);
    }

    #[test]
    fn force_status_overrides_kind_only() {
        let mut entry =
            StatusEntry::new_file(RawStatus::uniform(StatusKind::Added), Some(fp(1)), 500);
        entry.force_status(StatusKind::Modified);
        assert_eq!(entry.effective(), StatusKind::Modified);
        assert_eq!(entry.fingerprint(), Some(fp(1)));
        assert_eq!(entry.valid_until(), 500);
    }

    #[test]
    fn invalidate_forces_expiry() {
        let mut entry = StatusEntry::new_file(RawStatus::uniform(StatusKind::Normal), None, 0);
        assert!(!entry.has_expired(10));
        entry.invalidate();
        assert!(entry.has_expired(10));
    }

    #[test]
    fn record_roundtrip() {
        let mut entry = StatusEntry::new_file(
            RawStatus {
                text: StatusKind::Modified,
                prop: StatusKind::Normal,
                assume_valid: true,
                skip_worktree: false,
            },
            Some(FileFingerprint::new(123_456, true)),
            987,
        );
        entry.mark_directory();

        let mut buf = Vec::new();
        entry.write_to(&mut buf).unwrap();
        let decoded = StatusEntry::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn record_roundtrip_without_fingerprint() {
        let entry = StatusEntry::from_kind(StatusKind::Ignored);
        let mut buf = Vec::new();
        entry.write_to(&mut buf).unwrap();
        let decoded = StatusEntry::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.fingerprint(), None);
    }

    #[test]
    fn short_record_is_rejected() {
        let entry = StatusEntry::from_kind(StatusKind::Normal);
        let mut buf = Vec::new();
        entry.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(StatusEntry::read_from(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut buf = vec![42u8, 0, 0];
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        assert!(matches!(
            StatusEntry::read_from(&mut buf.as_slice()),
            Err(CacheError::Type(_))
        ));
    }
}
