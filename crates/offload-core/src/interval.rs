//! Ordered index from host address intervals to mapping records.
//!
//! Backed by a `BTreeMap` keyed by interval start rather than the original's
//! intrusive splay tree: lookups walk at most two candidate entries because
//! the non-overlap invariant (see `descriptor.rs`) guarantees any query range
//! can overlap at most one stored record in a well-formed index.

use std::collections::BTreeMap;

use crate::descriptor::DescHandle;

/// Points at one mapping record: the descriptor that owns it and its slot
/// within that descriptor's `array`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef {
    pub desc: DescHandle,
    pub index: usize,
}

struct Entry {
    host_end: u64,
    record: RecordRef,
}

#[derive(Default)]
pub struct IntervalIndex {
    by_start: BTreeMap<u64, Entry>,
}

impl IntervalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_start.is_empty()
    }

    pub fn insert(&mut self, host_start: u64, host_end: u64, record: RecordRef) {
        self.by_start.insert(host_start, Entry { host_end, record });
    }

    /// Removes the record keyed at exactly `host_start`. Callers always know
    /// the exact start of the record they're removing (it came from a prior
    /// `lookup`), so this never needs the overlap comparator.
    pub fn remove(&mut self, host_start: u64) -> Option<RecordRef> {
        self.by_start.remove(&host_start).map(|e| e.record)
    }

    /// Overlap comparator: `a < b` iff `a.end <= b.start`,
    /// `a > b` iff `a.start >= b.end`, otherwise the two intervals overlap
    /// (or one contains the other) and compare equal. Degenerate (point)
    /// intervals fall out of the same rule: two degenerates compare equal
    /// only when they sit at the same address, and a degenerate query
    /// matches a non-degenerate record only when the point lies strictly
    /// inside it.
    fn overlaps(a_start: u64, a_end: u64, b_start: u64, b_end: u64) -> bool {
        match (a_start == a_end, b_start == b_end) {
            (true, true) => a_start == b_start,
            (true, false) => b_start <= a_start && a_start < b_end,
            (false, true) => a_start <= b_start && b_start < a_end,
            (false, false) => a_start < b_end && b_start < a_end,
        }
    }

    /// Returns the record overlapping `[host_start, host_end)` under the
    /// comparator above, along with the bounds it was stored under.
    pub fn lookup(&self, host_start: u64, host_end: u64) -> Option<(u64, u64, RecordRef)> {
        if let Some((&s, e)) = self.by_start.range(..=host_start).next_back() {
            if Self::overlaps(s, e.host_end, host_start, host_end) {
                return Some((s, e.host_end, e.record));
            }
        }
        if host_end > host_start {
            if let Some((&s, e)) = self.by_start.range(host_start..host_end).next() {
                if Self::overlaps(s, e.host_end, host_start, host_end) {
                    return Some((s, e.host_end, e.record));
                }
            }
        }
        None
    }

    /// The overlap-aware probe used to resolve pointer bases (§4.1): tries
    /// the point itself, then the point extended one byte right, then one
    /// byte left, recovering "one past the end" pointers from array-section
    /// arithmetic.
    pub fn lookup_pointer_base(&self, point: u64) -> Option<(u64, u64, RecordRef)> {
        self.lookup(point, point)
            .or_else(|| self.lookup(point, point + 1))
            .or_else(|| if point > 0 { self.lookup(point - 1, point) } else { None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rref(i: usize) -> RecordRef {
        RecordRef { desc: DescHandle::from_raw_parts(0, 0), index: i }
    }

    #[test]
    fn exact_range_hit() {
        let mut idx = IntervalIndex::new();
        idx.insert(100, 200, rref(0));
        let (s, e, r) = idx.lookup(100, 200).expect("should hit");
        assert_eq!((s, e), (100, 200));
        assert_eq!(r, rref(0));
    }

    #[test]
    fn containment_hit() {
        let mut idx = IntervalIndex::new();
        idx.insert(100, 200, rref(0));
        assert!(idx.lookup(120, 150).is_some());
    }

    #[test]
    fn disjoint_miss() {
        let mut idx = IntervalIndex::new();
        idx.insert(100, 200, rref(0));
        assert!(idx.lookup(200, 210).is_none());
        assert!(idx.lookup(50, 100).is_none());
    }

    #[test]
    fn degenerate_matches_only_same_point() {
        let mut idx = IntervalIndex::new();
        idx.insert(100, 100, rref(0));
        assert!(idx.lookup(100, 100).is_some());
        assert!(idx.lookup(101, 101).is_none());
    }

    #[test]
    fn pointer_base_probe_recovers_one_past_end() {
        let mut idx = IntervalIndex::new();
        idx.insert(100, 200, rref(0));
        // 200 is one-past-the-end of [100, 200); the degenerate query at 200
        // misses directly but the left-extension probe recovers it.
        let (s, e, r) = idx.lookup_pointer_base(200).expect("probe should recover");
        assert_eq!((s, e), (100, 200));
        assert_eq!(r, rref(0));
    }

    #[test]
    fn remove_then_lookup_misses() {
        let mut idx = IntervalIndex::new();
        idx.insert(100, 200, rref(0));
        assert_eq!(idx.remove(100), Some(rref(0)));
        assert!(idx.lookup(100, 200).is_none());
    }
}
