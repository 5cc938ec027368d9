//! The reverse of `map_vars`: refcount decrement, copy-back, and cascading
//! deallocation once a descriptor's last reference drops.

use offload_abi::RefCount;

use crate::descriptor::DescHandle;
use crate::device::{DeviceDescriptor, DeviceState};
use crate::error::MapError;
use crate::fatal::FatalReporter;

/// `unmap_vars(tgt, do_copyfrom)`: walks every clause slot, decrements
/// refcounts, issues copy-back where requested, and frees the descriptor's
/// device block and record array once its own refcount reaches zero.
pub fn unmap_vars(device: &DeviceDescriptor, state: &mut DeviceState, fatal: &dyn FatalReporter, tgt: DescHandle, do_copyfrom: bool) {
    let slot_count = state.arena.get(tgt).expect("descriptor must exist").list.len();

    for i in 0..slot_count {
        let Some(rref) = state.arena.get(tgt).expect("descriptor must exist").list[i].record else { continue };
        let (copy_from, always_copy_from, length) = {
            let slot = &state.arena.get(tgt).expect("descriptor must exist").list[i];
            (slot.copy_from, slot.always_copy_from, slot.length)
        };

        let mut do_unmap = false;
        {
            let owner = state.arena.get_mut(rref.desc).expect("record owner must exist");
            let key = &mut owner.array[rref.index];
            match key.refcount {
                RefCount::Pinned => {}
                RefCount::Counted(n) if n > 1 => key.refcount.decrement(),
                RefCount::Counted(1) => {
                    if key.async_refcount > 0 {
                        key.async_refcount -= 1;
                    } else {
                        key.refcount.decrement();
                        do_unmap = true;
                    }
                }
                RefCount::Counted(0) => {
                    fatal.report(&MapError::RefcountAlreadyZero.to_string());
                }
            }
        }

        if always_copy_from || (do_unmap && do_copyfrom && copy_from) {
            copy_record_to_host(device, state, fatal, rref, length);
        }

        if do_unmap {
            let (host_start, owner_desc) = {
                let owner = state.arena.get(rref.desc).expect("record owner must exist");
                (owner.array[rref.index].host_start, rref.desc)
            };
            state.index.remove(host_start);
            release_owning_descriptor(device, state, fatal, owner_desc);
        }
    }

    release_owning_descriptor(device, state, fatal, tgt);
}

/// `copy_from_async(tgt)`: performs only the copy-back and the
/// refcount→async_refcount handoff. No key removal, no deallocation — a
/// later `unmap_vars(tgt, false)` completes the teardown once the async
/// copies are known to have landed.
pub fn copy_from_async(device: &DeviceDescriptor, state: &mut DeviceState, fatal: &dyn FatalReporter, tgt: DescHandle) {
    let slot_count = state.arena.get(tgt).expect("descriptor must exist").list.len();
    for i in 0..slot_count {
        let Some(rref) = state.arena.get(tgt).expect("descriptor must exist").list[i].record else { continue };
        let (copy_from, always_copy_from, length) = {
            let slot = &state.arena.get(tgt).expect("descriptor must exist").list[i];
            (slot.copy_from, slot.always_copy_from, slot.length)
        };
        if copy_from || always_copy_from {
            copy_record_to_host(device, state, fatal, rref, length);
        }
        let owner = state.arena.get_mut(rref.desc).expect("record owner must exist");
        let key = &mut owner.array[rref.index];
        if let RefCount::Counted(n) = key.refcount {
            if n > 0 {
                key.refcount = RefCount::Counted(n - 1);
                key.async_refcount += 1;
            }
        }
    }
}

fn copy_record_to_host(device: &DeviceDescriptor, state: &DeviceState, fatal: &dyn FatalReporter, rref: crate::interval::RecordRef, length: u64) {
    let owner = state.arena.get(rref.desc).expect("record owner must exist");
    let key = &owner.array[rref.index];
    let src = owner.tgt_start + key.tgt_offset;
    let len = length as usize;
    let dst = unsafe { std::slice::from_raw_parts_mut(key.host_start as *mut u8, len) };
    if let Err(e) = device.plugin.dev_to_host(device.target_id, dst, src) {
        fatal.report(&MapError::TransferFailed { target_id: device.target_id, source: e }.to_string());
    }
}

/// Decrements a descriptor's own refcount; frees its device block and
/// record array once it hits zero. Shared with the exit-data engine, which
/// triggers the same cascade when a record's own refcount hits zero.
pub(crate) fn release_owning_descriptor(device: &DeviceDescriptor, state: &mut DeviceState, fatal: &dyn FatalReporter, handle: DescHandle) {
    let hits_zero = {
        let desc = state.arena.get_mut(handle).expect("descriptor must exist");
        desc.refcount = desc
            .refcount
            .checked_sub(1)
            .unwrap_or_else(|| fatal.report(&MapError::DescriptorRefcountUnderflow.to_string()));
        desc.refcount == 0
    };
    if hits_zero {
        let desc = state.arena.remove(handle).expect("descriptor must exist");
        if desc.has_device_block() {
            if let Err(e) = device.plugin.free(device.target_id, desc.to_free) {
                fatal.report(&MapError::TransferFailed { target_id: device.target_id, source: e }.to_string());
            }
        }
        tracing::debug!(target_id = device.target_id, "descriptor freed");
    }
}
