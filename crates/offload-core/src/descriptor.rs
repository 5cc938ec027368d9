//! The target memory descriptor (`TgtDesc` in the original) and the
//! generational arena that owns them.
//!
//! Descriptors own their record arrays exclusively (`Vec<Key>`); the index
//! only ever stores a `DescHandle` plus an in-array position, so looking up
//! a record never requires walking back through a raw pointer. This is the
//! back-reference elimination called for in the design notes.

use offload_abi::ClauseOffset;

use crate::interval::RecordRef;
use crate::record::Key;

/// A generational handle into a [`DescArena`]. Stale handles (from a freed
/// slot that has since been reused) fail their generation check instead of
/// aliasing the wrong descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescHandle {
    index: u32,
    generation: u32,
}

impl DescHandle {
    pub(crate) fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

/// Per-clause bookkeeping so `unmap_vars` can reverse exactly what `map_vars`
/// did, without re-deriving anything from the kind byte.
#[derive(Debug, Clone)]
pub struct ClauseSlot {
    /// The record this clause resolved to, which may live on a *different*
    /// descriptor (an already-mapped clause bumped in place) or this one
    /// (a clause that needed a fresh allocation). `None` for clauses that
    /// never get a record at all (firstprivate_int, an unresolved
    /// zero-length section, a use_device_ptr translated in place, ...).
    pub record: Option<RecordRef>,
    pub offset: ClauseOffset,
    pub length: u64,
    pub copy_from: bool,
    pub always_copy_from: bool,
}

impl ClauseSlot {
    pub fn null(offset: ClauseOffset) -> Self {
        Self { record: None, offset, length: 0, copy_from: false, always_copy_from: false }
    }
}

pub struct TargetMemDesc {
    /// Aligned device block bounds; `0 == 0` when the descriptor owns no
    /// device memory (every clause was already mapped).
    pub tgt_start: u64,
    pub tgt_end: u64,
    /// The unaligned base the device allocator actually returned; this, not
    /// `tgt_start`, is what gets passed back to `free`.
    pub to_free: u64,
    pub array: Vec<Key>,
    pub list: Vec<ClauseSlot>,
    /// Live references to the whole descriptor: every contained key refcount
    /// bump increments this, plus external holders (nested-data stack
    /// entries, in-flight async copies, pending unmap).
    pub refcount: u64,
    /// Links nested `target data` regions on a thread's data-region stack.
    pub prev: Option<DescHandle>,
    pub device_target_id: i32,
}

impl TargetMemDesc {
    pub fn has_device_block(&self) -> bool {
        self.tgt_start != 0 || self.tgt_end != 0
    }
}

enum Slot {
    Occupied { generation: u32, desc: TargetMemDesc },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// A slab arena of descriptors, one per device. Freed slots are recycled;
/// their generation counter is bumped so a stale `DescHandle` from before the
/// free is rejected rather than silently aliasing the new occupant.
#[derive(Default)]
pub struct DescArena {
    slots: Vec<Slot>,
    free_head: Option<u32>,
}

impl DescArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, desc: TargetMemDesc) -> DescHandle {
        if let Some(index) = self.free_head {
            let Slot::Vacant { generation, next_free } = self.slots[index as usize] else {
                unreachable!("free list pointed at an occupied slot");
            };
            self.free_head = next_free;
            self.slots[index as usize] = Slot::Occupied { generation, desc };
            DescHandle { index, generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot::Occupied { generation: 0, desc });
            DescHandle { index, generation: 0 }
        }
    }

    pub fn get(&self, handle: DescHandle) -> Option<&TargetMemDesc> {
        match self.slots.get(handle.index as usize)? {
            Slot::Occupied { generation, desc } if *generation == handle.generation => Some(desc),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: DescHandle) -> Option<&mut TargetMemDesc> {
        match self.slots.get_mut(handle.index as usize)? {
            Slot::Occupied { generation, desc } if *generation == handle.generation => Some(desc),
            _ => None,
        }
    }

    pub fn remove(&mut self, handle: DescHandle) -> Option<TargetMemDesc> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => {
                let next_generation = generation.wrapping_add(1);
                let Slot::Occupied { desc, .. } =
                    std::mem::replace(slot, Slot::Vacant { generation: next_generation, next_free: self.free_head })
                else {
                    unreachable!();
                };
                self.free_head = Some(handle.index);
                Some(desc)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_desc() -> TargetMemDesc {
        TargetMemDesc {
            tgt_start: 0,
            tgt_end: 0,
            to_free: 0,
            array: Vec::new(),
            list: Vec::new(),
            refcount: 0,
            prev: None,
            device_target_id: 0,
        }
    }

    #[test]
    fn stale_handle_rejected_after_reuse() {
        let mut arena = DescArena::new();
        let a = arena.insert(empty_desc());
        arena.remove(a).expect("should remove");
        let b = arena.insert(empty_desc());
        assert!(arena.get(a).is_none());
        assert!(arena.get(b).is_some());
    }

    #[test]
    fn mutation_round_trips() {
        let mut arena = DescArena::new();
        let h = arena.insert(empty_desc());
        arena.get_mut(h).unwrap().refcount = 3;
        assert_eq!(arena.get(h).unwrap().refcount, 3);
    }
}
