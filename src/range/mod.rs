// Byte ranges
//   All public ranges are inclusive: [start, end] covers end - start + 1 bytes.
//   Exclusive ends (offset + length) only appear inside from_exclusive/end_exclusive.

use std::collections::BTreeMap;
use std::fmt;

mod compose;
mod merge;
mod reconcile;

pub use compose::{compose, RangeComposer};
pub use merge::merge_chunks;
pub use reconcile::reconcile;

/// Fetched bytes keyed by the object offset of their first byte
pub type ChunkMap = BTreeMap<u64, Vec<u8>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Inclusive range, or None if `start > end`.
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// The `byte_length` bytes starting at `offset`. Zero-length spans have no range.
    pub fn from_offset_len(offset: u64, byte_length: u64) -> Option<Self> {
        match byte_length {
            0 => None,
            n => Some(Self {
                start: offset,
                end: offset.checked_add(n - 1)?,
            }),
        }
    }

    /// Converts a half-open `[start, end)` span.
    pub fn from_exclusive(start: u64, end: u64) -> Option<Self> {
        Self::from_offset_len(start, end.checked_sub(start)?)
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn end_exclusive(&self) -> u64 {
        self.end + 1
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset <= self.end
    }

    pub fn contains_range(&self, other: &ByteRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// True if `next` begins on the byte right after this range ends.
    pub fn is_followed_by(&self, next: &ByteRange) -> bool {
        self.end.checked_add(1) == Some(next.start)
    }

    /// Value for an HTTP `Range` header (both ends inclusive)
    pub fn http_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_len_is_inclusive() {
        let range = ByteRange::from_offset_len(1000, 24).unwrap();
        assert_eq!(range, ByteRange { start: 1000, end: 1023 });
        assert_eq!(range.len(), 24);
        assert_eq!(range.end_exclusive(), 1024);
        assert_eq!(range.http_header(), "bytes=1000-1023");
    }

    #[test]
    fn degenerate_spans_have_no_range() {
        assert_eq!(ByteRange::new(10, 9), None);
        assert_eq!(ByteRange::from_offset_len(10, 0), None);
        assert_eq!(ByteRange::from_exclusive(10, 10), None);
        assert_eq!(ByteRange::from_offset_len(u64::MAX, 2), None);
        assert_eq!(ByteRange::new(7, 7).map(|r| r.len()), Some(1));
    }

    #[test]
    fn exclusive_conversion_round_trips() {
        let range = ByteRange::from_exclusive(100, 200).unwrap();
        assert_eq!(range, ByteRange { start: 100, end: 199 });
        assert_eq!(range.end_exclusive(), 200);
    }

    #[test]
    fn adjacency_and_containment() {
        let a = ByteRange::new(0, 99).unwrap();
        let b = ByteRange::new(100, 199).unwrap();
        assert!(a.is_followed_by(&b));
        assert!(!b.is_followed_by(&a));
        assert!(a.contains(99));
        assert!(!a.contains(100));
        assert!(ByteRange::new(0, 199).unwrap().contains_range(&b));
    }
}
