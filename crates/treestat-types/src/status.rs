//! The ordered status enumeration and its merge function.
//!
//! Every aggregation in the cache is expressed as repeated pairwise
//! [`merge`], which picks the more important of two kinds under a fixed
//! total order. The order places "quiet" states below states a user would
//! want surfaced on a folder icon.

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Version-control status of a single path.
///
/// The variants form a total order of increasing importance:
///
/// `None < Unversioned < Ignored < Normal < Modified < Added < Deleted <
/// Missing < Conflicted`
///
/// `None` is the representable "no data" state; cache misses return it
/// rather than an error.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum StatusKind {
    /// No status known for this path.
    #[default]
    None = 0,
    /// Present in the working tree but not tracked.
    Unversioned = 1,
    /// Untracked and matched by an ignore rule.
    Ignored = 2,
    /// Tracked and unchanged.
    Normal = 3,
    /// Tracked with local modifications.
    Modified = 4,
    /// Scheduled for addition.
    Added = 5,
    /// Scheduled for deletion.
    Deleted = 6,
    /// Tracked but absent from the working tree.
    Missing = 7,
    /// In an unresolved merge conflict.
    Conflicted = 8,
}

impl StatusKind {
    /// Returns `true` for kinds that describe a tracked path.
    ///
    /// `None`, `Unversioned`, and `Ignored` are not versioned.
    pub fn is_versioned(self) -> bool {
        self >= StatusKind::Normal
    }

    /// Collapse kinds that make no sense on a folder summary.
    ///
    /// Folders are never displayed as added or deleted, only as modified.
    pub fn fold_for_directory(self) -> StatusKind {
        match self {
            StatusKind::Added | StatusKind::Deleted => StatusKind::Modified,
            other => other,
        }
    }

    /// Stable wire discriminant for snapshot records.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a wire discriminant. Unknown values are a decode error.
    pub fn from_u8(value: u8) -> Result<Self, TypeError> {
        Ok(match value {
            0 => StatusKind::None,
            1 => StatusKind::Unversioned,
            2 => StatusKind::Ignored,
            3 => StatusKind::Normal,
            4 => StatusKind::Modified,
            5 => StatusKind::Added,
            6 => StatusKind::Deleted,
            7 => StatusKind::Missing,
            8 => StatusKind::Conflicted,
            other => return Err(TypeError::UnknownStatusKind(other)),
        })
    }
}

/// Return the more important of two status kinds.
///
/// Commutative, associative, idempotent, and monotonic: the result is never
/// less important than either input.
pub fn merge(a: StatusKind, b: StatusKind) -> StatusKind {
    a.max(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [StatusKind; 9] = [
        StatusKind::None,
        StatusKind::Unversioned,
        StatusKind::Ignored,
        StatusKind::Normal,
        StatusKind::Modified,
        StatusKind::Added,
        StatusKind::Deleted,
        StatusKind::Missing,
        StatusKind::Conflicted,
    ];

    fn any_kind() -> impl Strategy<Value = StatusKind> {
        prop::sample::select(ALL.to_vec())
    }

    #[test]
    fn order_matches_importance() {
        for window in ALL.windows(2) {
            assert!(window[0] < window[1]);
        }
    }

    #[test]
    fn versioned_boundary() {
        assert!(!StatusKind::None.is_versioned());
        assert!(!StatusKind::Unversioned.is_versioned());
        assert!(!StatusKind::Ignored.is_versioned());
        assert!(StatusKind::Normal.is_versioned());
        assert!(StatusKind::Conflicted.is_versioned());
    }

    #[test]
    fn directory_fold_collapses_added_and_deleted() {
        assert_eq!(StatusKind::Added.fold_for_directory(), StatusKind::Modified);
        assert_eq!(StatusKind::Deleted.fold_for_directory(), StatusKind::Modified);
        assert_eq!(StatusKind::Missing.fold_for_directory(), StatusKind::Missing);
        assert_eq!(StatusKind::Normal.fold_for_directory(), StatusKind::Normal);
    }

    #[test]
    fn wire_roundtrip() {
        for kind in ALL {
            assert_eq!(StatusKind::from_u8(kind.as_u8()).unwrap(), kind);
        }
        assert!(StatusKind::from_u8(9).is_err());
        assert!(StatusKind::from_u8(0xff).is_err());
    }

    proptest! {
        #[test]
        fn merge_commutative(a in any_kind(), b in any_kind()) {
            prop_assert_eq!(merge(a, b), merge(b, a));
        }

        #[test]
        fn merge_associative(a in any_kind(), b in any_kind(), c in any_kind()) {
            prop_assert_eq!(merge(merge(a, b), c), merge(a, merge(b, c)));
        }

        #[test]
        fn merge_idempotent(a in any_kind()) {
            prop_assert_eq!(merge(a, a), a);
        }

        #[test]
        fn merge_monotonic(a in any_kind(), b in any_kind()) {
            let m = merge(a, b);
            prop_assert!(m >= a);
            prop_assert!(m >= b);
        }
    }
}
