//! Per-thread `target data` region stack: `target_data_begin` pushes,
//! `target_data_end` pops. Anchored on a thread-local so nested regions
//! within one thread see a plain stack without needing a task-ICV to carry
//! it explicitly.

use std::cell::RefCell;

use offload_core::DescHandle;

#[cfg(test)]
use offload_core::{DescArena, TargetMemDesc};

/// One stacked `target data` region: which device it ran on and the
/// descriptor `target_data_end` must unmap.
pub struct DataRegion {
    pub device_type: String,
    pub target_id: i32,
    pub desc: DescHandle,
}

thread_local! {
    static DATA_STACK: RefCell<Vec<DataRegion>> = const { RefCell::new(Vec::new()) };
}

pub fn push(region: DataRegion) {
    DATA_STACK.with(|stack| stack.borrow_mut().push(region));
}

pub fn pop() -> Option<DataRegion> {
    DATA_STACK.with(|stack| stack.borrow_mut().pop())
}

pub fn depth() -> usize {
    DATA_STACK.with(|stack| stack.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_handle(arena: &mut DescArena) -> DescHandle {
        arena.insert(TargetMemDesc {
            tgt_start: 0,
            tgt_end: 0,
            to_free: 0,
            array: Vec::new(),
            list: Vec::new(),
            refcount: 0,
            prev: None,
            device_target_id: 0,
        })
    }

    #[test]
    fn push_pop_is_lifo() {
        let mut arena = DescArena::new();
        assert_eq!(depth(), 0);
        push(DataRegion { device_type: "mock".into(), target_id: 0, desc: dummy_handle(&mut arena) });
        push(DataRegion { device_type: "mock".into(), target_id: 1, desc: dummy_handle(&mut arena) });
        assert_eq!(depth(), 2);
        let top = pop().unwrap();
        assert_eq!(top.target_id, 1);
        assert_eq!(depth(), 1);
        pop();
        assert_eq!(depth(), 0);
    }
}
