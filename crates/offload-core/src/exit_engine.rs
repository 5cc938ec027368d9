//! `target enter/exit data`'s exit half: per-clause refcount release,
//! optional copy-back, and cascading free once a record's refcount hits
//! zero (§4.7).

use offload_abi::{MapOperation, RefCount};

use crate::device::{DeviceDescriptor, DeviceState};
use crate::error::MapError;
use crate::fatal::FatalReporter;
use crate::unmap_engine::release_owning_descriptor;

pub struct ExitRequest<'a> {
    pub hostaddrs: &'a [u64],
    pub sizes: &'a [u64],
    pub operations: &'a [MapOperation],
}

pub fn exit_data(device: &DeviceDescriptor, state: &mut DeviceState, fatal: &dyn FatalReporter, req: &ExitRequest<'_>) {
    for i in 0..req.hostaddrs.len() {
        let op = req.operations[i];
        if !matches!(
            op,
            MapOperation::From
                | MapOperation::AlwaysFrom
                | MapOperation::Delete
                | MapOperation::Release
                | MapOperation::ZeroLenArraySection
                | MapOperation::DeleteZeroLenArraySection
        ) {
            fatal.report(&MapError::ExitClauseUnhandled { index: i }.to_string());
        }

        let host_start = req.hostaddrs[i];
        let host_end = host_start + req.sizes[i];
        let zero_len = matches!(op, MapOperation::ZeroLenArraySection | MapOperation::DeleteZeroLenArraySection);

        let hit = if zero_len { state.index.lookup_pointer_base(host_start) } else { state.index.lookup(host_start, host_end) };
        let Some((record_start, _record_end, rref)) = hit else { continue };

        let is_delete = matches!(op, MapOperation::Delete | MapOperation::DeleteZeroLenArraySection);

        let (just_hit_zero, tgt_addr) = {
            let owner = state.arena.get_mut(rref.desc).expect("record owner must exist");
            let key = &mut owner.array[rref.index];
            let was_pinned = key.refcount.is_pinned();
            if is_delete {
                key.refcount.clear();
            } else {
                key.refcount.decrement();
            }
            let hit_zero = !was_pinned && key.refcount == RefCount::Counted(0);
            let tgt_addr = owner.tgt_start + key.tgt_offset + (host_start - record_start);
            (hit_zero, tgt_addr)
        };

        let copy_back = matches!(op, MapOperation::AlwaysFrom) || (just_hit_zero && matches!(op, MapOperation::From));
        if copy_back {
            let len = (host_end - host_start) as usize;
            let bytes = unsafe { std::slice::from_raw_parts_mut(host_start as *mut u8, len) };
            if let Err(e) = device.plugin.dev_to_host(device.target_id, bytes, tgt_addr) {
                fatal.report(&MapError::TransferFailed { target_id: device.target_id, source: e }.to_string());
            }
        }

        if just_hit_zero {
            state.index.remove(record_start);
            release_owning_descriptor(device, state, fatal, rref.desc);
        }
    }
}
