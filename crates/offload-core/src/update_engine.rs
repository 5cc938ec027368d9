//! `target_update`'s engine: re-copy already-mapped ranges without touching
//! any refcount.

use offload_abi::MapOperation;

use crate::device::{DeviceDescriptor, DeviceState};
use crate::error::MapError;
use crate::fatal::FatalReporter;

pub struct UpdateRequest<'a> {
    pub hostaddrs: &'a [u64],
    pub sizes: &'a [u64],
    pub operations: &'a [MapOperation],
}

/// For each non-zero-size clause, looks up the full host range (which must
/// be fully contained in one record) and issues the copy the operation
/// asks for. No refcount changes.
pub fn update(device: &DeviceDescriptor, state: &DeviceState, fatal: &dyn FatalReporter, req: &UpdateRequest<'_>) {
    for i in 0..req.hostaddrs.len() {
        let size = req.sizes[i];
        if size == 0 {
            continue;
        }
        let host_start = req.hostaddrs[i];
        let host_end = host_start + size;

        // No hit at all is a routine, recoverable situation (the caller may
        // simply not have mapped this range yet): skip the clause rather than
        // treating it as a contract violation.
        let Some((record_start, record_end, rref)) = state.index.lookup(host_start, host_end) else {
            continue;
        };
        if host_start < record_start || host_end > record_end {
            fatal.report(
                &MapError::UpdateRangeNotContained { host_start, host_end, record_start, record_end }.to_string(),
            );
        }

        let owner = state.arena.get(rref.desc).expect("record owner must exist");
        let key = &owner.array[rref.index];
        let tgt_addr = owner.tgt_start + key.tgt_offset + (host_start - record_start);
        let len = (host_end - host_start) as usize;

        let op = req.operations[i];
        if op.copy_to() {
            let bytes = unsafe { std::slice::from_raw_parts(host_start as *const u8, len) };
            if let Err(e) = device.plugin.host_to_dev(device.target_id, tgt_addr, bytes) {
                fatal.report(&MapError::TransferFailed { target_id: device.target_id, source: e }.to_string());
            }
        }
        if op.copy_from() || op.always_copy_from() {
            let bytes = unsafe { std::slice::from_raw_parts_mut(host_start as *mut u8, len) };
            if let Err(e) = device.plugin.dev_to_host(device.target_id, bytes, tgt_addr) {
                fatal.report(&MapError::TransferFailed { target_id: device.target_id, source: e }.to_string());
            }
        }
    }
}
