/// How to materialize a clause slot's device address when the slot has no
/// backing [`crate`]-level record (`key == None` in the original C).
///
/// Replaces the sentinel values `~0`, `~1`, `~2` (and the plain firstprivate
/// offset) the original encoded into `list[i].offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseOffset {
    /// `use_device_ptr` / null-host-address / `firstprivate_int`: pass the
    /// original host address straight through into the argument array.
    PassThroughHostAddr,
    /// Zero-length array section that wasn't found: the device pointer is
    /// simply null.
    Zero,
    /// A `GOMP_MAP_STRUCT` clause's own slot: the absolute device address
    /// already computed from its first sibling's resolved record plus a
    /// host-to-host delta, at the time the sibling's record was resolved.
    ComputedFromSibling(u64),
    /// A firstprivate (or otherwise device-block-relative) clause at a fixed
    /// byte offset inside the descriptor's device block.
    DeviceOffset(u64),
}

/// A mapping record's synchronous use count.
///
/// `Pinned` replaces the `REFCOUNT_INFINITY` sentinel: image-registered
/// symbols and user `associate_ptr` calls are never reclaimed automatically,
/// and no arithmetic path can accidentally decrement them because the
/// variant itself forbids it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefCount {
    Pinned,
    Counted(u64),
}

impl RefCount {
    pub fn one() -> Self {
        Self::Counted(1)
    }

    pub fn is_pinned(self) -> bool {
        matches!(self, Self::Pinned)
    }

    pub fn value(self) -> Option<u64> {
        match self {
            Self::Pinned => None,
            Self::Counted(n) => Some(n),
        }
    }

    /// Bump the count by one; a no-op for `Pinned`.
    pub fn increment(&mut self) {
        if let Self::Counted(n) = self {
            *n += 1;
        }
    }

    /// Decrement the count by one; a no-op for `Pinned`. Panics on
    /// underflow, which would indicate a bookkeeping bug in the engine, not
    /// a condition a caller can trigger.
    pub fn decrement(&mut self) {
        if let Self::Counted(n) = self {
            *n = n.checked_sub(1).expect("refcount underflow");
        }
    }

    /// Force the count to zero; a no-op for `Pinned` (used by `DELETE`).
    pub fn clear(&mut self) {
        if let Self::Counted(n) = self {
            *n = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_refcount_never_moves() {
        let mut r = RefCount::Pinned;
        r.increment();
        r.decrement();
        r.clear();
        assert_eq!(r, RefCount::Pinned);
        assert_eq!(r.value(), None);
    }

    #[test]
    fn counted_refcount_tracks_value() {
        let mut r = RefCount::one();
        r.increment();
        assert_eq!(r.value(), Some(2));
        r.decrement();
        r.decrement();
        assert_eq!(r, RefCount::Counted(0));
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn decrementing_past_zero_panics() {
        let mut r = RefCount::Counted(0);
        r.decrement();
    }
}
