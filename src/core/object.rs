//! The stored unit of data: an [`Object`] living inside a [`Container`].

use serde_json::Value as JsonValue;

use crate::storage::segment::SegmentId;

/// Set once the object has been durably written at least once.
pub const OBJ_FLAG_EXISTS: u8 = 0b0000_0001;
/// Set while the object only exists inside a view-state's private copy
/// and hasn't been published to the container yet.
pub const OBJ_FLAG_NEW: u8 = 0b0000_0010;

/// Extract the 4-bit partial-field count packed into the high nibble of
/// an object's flags byte. Non-zero values are rejected until partial
/// objects are defined (see [`crate::error::Error::PartialNotSupported`]).
pub fn partial_count(flags: u8) -> u8 {
    flags >> 4
}

pub fn is_flag(flags: u8, flag: u8) -> bool {
    flags & flag != 0
}

pub fn set_flag(flags: u8, flag: u8, on: bool) -> u8 {
    if on {
        flags | flag
    } else {
        flags & !flag
    }
}

/// Canonical string key used by the lock table and debug output;
/// `Container`/`ViewState` storage keys objects by `(container, key)`
/// tuples directly rather than this joined form.
pub fn object_key(container: &str, key: &str) -> String {
    format!("{container}^{key}")
}

/// A single key's value plus the bookkeeping needed to find and verify
/// its backing segment entry.
#[derive(Clone, Debug, Default)]
pub struct Object {
    pub flags: u8,
    /// The segment that holds this object's most recent `obj_op` mutation.
    pub segment_id: SegmentId,
    /// That mutation's position relative to the segment's start.
    pub relative_position: u32,
    /// Materialized value, lazily populated from the segment chain the
    /// first time it's read. `None` means "not yet materialized", not
    /// "absent" -- absence is `flags & OBJ_FLAG_EXISTS == 0`.
    pub data: Option<JsonValue>,
}

impl Object {
    pub fn exists(&self) -> bool {
        is_flag(self.flags, OBJ_FLAG_EXISTS)
    }

    pub fn is_new(&self) -> bool {
        is_flag(self.flags, OBJ_FLAG_NEW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_helpers_round_trip() {
        let mut flags = 0u8;
        flags = set_flag(flags, OBJ_FLAG_EXISTS, true);
        assert!(is_flag(flags, OBJ_FLAG_EXISTS));
        flags = set_flag(flags, OBJ_FLAG_EXISTS, false);
        assert!(!is_flag(flags, OBJ_FLAG_EXISTS));
    }

    #[test]
    fn partial_count_reads_high_nibble() {
        assert_eq!(partial_count(0b0011_0001), 0b0011);
    }
}
