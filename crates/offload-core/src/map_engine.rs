//! The two-pass map-clause engine: `map_vars` and its `map_vars_existing`/
//! `map_fields_existing` helpers.
//!
//! Pass 1 classifies every clause, resolving the ones that are already
//! mapped in place (bumping their refcount) and sizing the device block the
//! rest will need. Pass 2 walks the clauses a second time and materializes
//! the ones that came up empty, now that the block has a base address.

use offload_abi::{ClauseOffset, MapKind, MapOperation, PragmaKind, RefCount};

use crate::descriptor::{ClauseSlot, DescHandle, TargetMemDesc};
use crate::device::{DeviceDescriptor, DeviceState};
use crate::error::MapError;
use crate::fatal::FatalReporter;
use crate::interval::RecordRef;
use crate::record::Key;

pub struct MapRequest<'a> {
    pub pragma: PragmaKind,
    pub hostaddrs: &'a [u64],
    pub sizes: &'a [u64],
    pub kinds: &'a [MapKind],
    /// Preallocated device memory, adopted instead of calling the plugin
    /// allocator, valid only when there's exactly one clause.
    pub devaddrs: Option<u64>,
}

pub struct MapOutcome {
    pub desc: Option<DescHandle>,
    /// `hostaddrs[i]`, or the translated device pointer for `use_device_ptr`
    /// clauses. The caller writes these back into its own argument storage.
    pub resolved_hostaddrs: Vec<u64>,
}

fn align_up(offset: u64, align: u64) -> u64 {
    (offset + align - 1) / align * align
}

/// What pass 1 decided about one clause, carried into pass 2.
enum Plan {
    /// Fully resolved in pass 1; nothing left to do.
    Done,
    /// Needs a fresh `Key` at `planned_offset` bytes into the new block,
    /// indexed under `[host_start, host_end)`.
    Alloc { planned_offset: u64, host_start: u64, host_end: u64, operation: MapOperation },
    /// A `GOMP_MAP_STRUCT` clause whose enclosing region wasn't mapped:
    /// siblings `i+1..=i+span` get records at `planned_offset + (sibling
    /// host_start - enclosing host_start)`.
    StructAlloc { planned_offset: u64, enclosing_start: u64, span: usize },
    /// A firstprivate clause: no `Key`, just a copy at a fixed block offset.
    Firstprivate { planned_offset: u64 },
}

pub fn map_vars(device: &DeviceDescriptor, state: &mut DeviceState, fatal: &dyn FatalReporter, req: &MapRequest<'_>) -> MapOutcome {
    let mapnum = req.hostaddrs.len();
    let mut slots: Vec<ClauseSlot> = (0..mapnum).map(|_| ClauseSlot::null(ClauseOffset::PassThroughHostAddr)).collect();
    let mut resolved = req.hostaddrs.to_vec();
    let mut plans: Vec<Plan> = Vec::with_capacity(mapnum);

    let mut tgt_size: u64 = 0;
    let mut tgt_align: u64 = 1;
    let mut not_found_cnt = 0usize;

    let operations: Vec<MapOperation> = req.kinds.iter().map(|k| k.operation().unwrap_or_else(|e| fatal.report(&e.to_string()))).collect();

    let mut i = 0;
    while i < mapnum {
        let op = operations[i];
        let host_addr = req.hostaddrs[i];
        let size = req.sizes[i];

        match op {
            MapOperation::FirstprivateInt => {
                plans.push(Plan::Done);
            }
            MapOperation::UseDevicePtr => {
                match state.index.lookup_pointer_base(host_addr) {
                    Some((record_start, _, rref)) => {
                        resolved[i] = device_address(state, rref, record_start, host_addr);
                        plans.push(Plan::Done);
                    }
                    None => fatal.report(&MapError::UseDevicePtrUnmapped { host_addr, target_id: device.target_id }.to_string()),
                }
            }
            MapOperation::Struct => {
                let span = size as usize;
                let enclosing_end = req.hostaddrs[i + span] + req.sizes[i + span];
                match state.index.lookup(host_addr, enclosing_end) {
                    None => {
                        let align = req.kinds[i].align();
                        tgt_align = tgt_align.max(align);
                        tgt_size = align_up(tgt_size, align);
                        let planned_offset = tgt_size;
                        tgt_size += enclosing_end - host_addr;
                        not_found_cnt += span + 1;
                        plans.push(Plan::StructAlloc { planned_offset, enclosing_start: host_addr, span });
                        for _ in 0..span {
                            plans.push(Plan::Done);
                        }
                    }
                    Some((record_start, _, rref)) => {
                        let head_addr = device_address(state, rref, record_start, host_addr);
                        slots[i] = ClauseSlot::null(ClauseOffset::ComputedFromSibling(head_addr));
                        plans.push(Plan::Done);
                        for j in (i + 1)..=(i + span) {
                            map_fields_existing(device, state, fatal, rref, record_start, req.hostaddrs[j], req.sizes[j], operations[j], &mut slots[j]);
                            plans.push(Plan::Done);
                        }
                    }
                }
                i += span + 1;
                continue;
            }
            MapOperation::Firstprivate => {
                let align = req.kinds[i].align();
                tgt_align = tgt_align.max(align);
                tgt_size = align_up(tgt_size, align);
                let planned_offset = tgt_size;
                tgt_size += size;
                not_found_cnt += 1;
                plans.push(Plan::Firstprivate { planned_offset });
            }
            MapOperation::ZeroLenArraySection => match state.index.lookup_pointer_base(host_addr) {
                Some((record_start, _, rref)) => {
                    map_vars_existing(device, state, fatal, rref, record_start, host_addr, host_addr, op, &mut slots[i]);
                    plans.push(Plan::Done);
                }
                None => {
                    slots[i] = ClauseSlot::null(ClauseOffset::Zero);
                    plans.push(Plan::Done);
                }
            },
            _ if host_addr == 0 => {
                plans.push(Plan::Done);
            }
            _ => {
                let clause_len = if op.is_pointer_sized() { 8 } else { size };
                match state.index.lookup(host_addr, host_addr + clause_len) {
                    Some((record_start, _, rref)) => {
                        map_vars_existing(device, state, fatal, rref, record_start, host_addr, clause_len, op, &mut slots[i]);
                        plans.push(Plan::Done);
                    }
                    None => {
                        let align = req.kinds[i].align();
                        tgt_align = tgt_align.max(align);
                        tgt_size = align_up(tgt_size, align);
                        let planned_offset = tgt_size;
                        tgt_size += clause_len;
                        not_found_cnt += 1;
                        plans.push(Plan::Alloc { planned_offset, host_start: host_addr, host_end: host_addr + clause_len, operation: op });
                    }
                }
            }
        }
        i += 1;
    }

    let needs_block = not_found_cnt > 0 || req.pragma == PragmaKind::Target;
    let (tgt_start, to_free) = if let Some(addr) = req.devaddrs.filter(|_| mapnum == 1) {
        (addr, addr)
    } else if needs_block {
        let alloc_size = tgt_size + tgt_align.saturating_sub(1);
        let base = match device.plugin.alloc(device.target_id, alloc_size) {
            Ok(a) => a,
            Err(e) => fatal.report(&MapError::AllocationFailed { target_id: device.target_id, size: alloc_size, source: e }.to_string()),
        };
        (align_up(base, tgt_align), base)
    } else {
        (0, 0)
    };

    let handle = state.arena.insert(TargetMemDesc {
        tgt_start,
        tgt_end: tgt_start + tgt_size,
        to_free,
        array: Vec::new(),
        list: Vec::new(),
        refcount: 0,
        prev: None,
        device_target_id: device.target_id,
    });

    let mut array: Vec<Key> = Vec::new();
    let mut desc_refcount = 0u64;

    for (i, plan) in plans.into_iter().enumerate() {
        match plan {
            Plan::Done => {}
            Plan::Firstprivate { planned_offset } => {
                let dst = tgt_start + planned_offset;
                let len = req.sizes[i] as usize;
                let bytes = unsafe { std::slice::from_raw_parts(req.hostaddrs[i] as *const u8, len) };
                if let Err(e) = device.plugin.host_to_dev(device.target_id, dst, bytes) {
                    fatal.report(&MapError::TransferFailed { target_id: device.target_id, source: e }.to_string());
                }
                slots[i] = ClauseSlot::null(ClauseOffset::DeviceOffset(planned_offset));
            }
            Plan::Alloc { planned_offset, host_start, host_end, operation } => {
                let index = array.len();
                array.push(Key {
                    host_start,
                    host_end,
                    tgt_offset: planned_offset,
                    tgt: handle,
                    refcount: RefCount::one(),
                    async_refcount: 0,
                });
                let rref = RecordRef { desc: handle, index };
                state.index.insert(host_start, host_end, rref);
                desc_refcount += 1;

                if matches!(operation, MapOperation::Pointer) {
                    // The clause's host slot holds a pointer value, not the
                    // pointee itself: resolve what it points to, subtract
                    // the host-side bias, and write the translated device
                    // pointer in its place.
                    let pointee_host = unsafe { std::ptr::read(host_start as *const u64) };
                    let translated = resolve_pointer_target(state, fatal, pointee_host, device.target_id);
                    if let Err(e) = device.plugin.host_to_dev(device.target_id, tgt_start + planned_offset, &translated.to_ne_bytes()) {
                        fatal.report(&MapError::TransferFailed { target_id: device.target_id, source: e }.to_string());
                    }
                } else if operation.copy_to() {
                    let len = (host_end - host_start) as usize;
                    let bytes = unsafe { std::slice::from_raw_parts(host_start as *const u8, len) };
                    if let Err(e) = device.plugin.host_to_dev(device.target_id, tgt_start + planned_offset, bytes) {
                        fatal.report(&MapError::TransferFailed { target_id: device.target_id, source: e }.to_string());
                    }
                }
                if matches!(operation, MapOperation::ForcePresent) {
                    fatal.report(&MapError::ForcePresentMiss.to_string());
                }
                slots[i] = ClauseSlot {
                    record: Some(rref),
                    offset: ClauseOffset::PassThroughHostAddr,
                    length: host_end - host_start,
                    copy_from: operation.copy_from(),
                    always_copy_from: operation.always_copy_from(),
                };
            }
            Plan::StructAlloc { planned_offset, enclosing_start, span } => {
                let mut head_addr = None;
                for j in (i + 1)..=(i + span) {
                    let host_start = req.hostaddrs[j];
                    let host_end = host_start + req.sizes[j];
                    let field_offset = planned_offset + (host_start - enclosing_start);
                    let index = array.len();
                    array.push(Key {
                        host_start,
                        host_end,
                        tgt_offset: field_offset,
                        tgt: handle,
                        refcount: RefCount::one(),
                        async_refcount: 0,
                    });
                    let rref = RecordRef { desc: handle, index };
                    state.index.insert(host_start, host_end, rref);
                    desc_refcount += 1;
                    let op = operations[j];
                    if op.copy_to() {
                        let len = (host_end - host_start) as usize;
                        let bytes = unsafe { std::slice::from_raw_parts(host_start as *const u8, len) };
                        if let Err(e) = device.plugin.host_to_dev(device.target_id, tgt_start + field_offset, bytes) {
                            fatal.report(&MapError::TransferFailed { target_id: device.target_id, source: e }.to_string());
                        }
                    }
                    slots[j] = ClauseSlot {
                        record: Some(rref),
                        offset: ClauseOffset::PassThroughHostAddr,
                        length: host_end - host_start,
                        copy_from: op.copy_from(),
                        always_copy_from: op.always_copy_from(),
                    };
                    // The struct clause's own device address, derived from its
                    // first sibling's resolved offset plus the host-to-host
                    // delta between the struct's own address and that
                    // sibling's — mirrors the original's `~2` sentinel.
                    if head_addr.is_none() {
                        head_addr = Some((tgt_start + field_offset) + (req.hostaddrs[i] - host_start));
                    }
                }
                slots[i] = ClauseSlot::null(ClauseOffset::ComputedFromSibling(head_addr.expect("span is always >= 1")));
            }
        }
    }

    let desc = state.arena.get_mut(handle).expect("descriptor just inserted");
    desc.array = array;
    desc.list = slots;
    desc.refcount = desc_refcount;

    if req.pragma == PragmaKind::Target {
        write_argument_array(device, state, fatal, handle, &resolved);
    }

    if req.pragma == PragmaKind::EnterData && desc_refcount == 0 {
        state.arena.remove(handle);
        tracing::debug!(target_id = device.target_id, "enter data batch fully pre-mapped, no descriptor kept");
        return MapOutcome { desc: None, resolved_hostaddrs: resolved };
    }

    tracing::debug!(target_id = device.target_id, mapnum, not_found_cnt, "map_vars completed");
    MapOutcome { desc: Some(handle), resolved_hostaddrs: resolved }
}

/// The device address a resolved record maps `host_addr` to (used for
/// `use_device_ptr` translation and pointer clauses).
fn device_address(state: &DeviceState, rref: RecordRef, record_host_start: u64, host_addr: u64) -> u64 {
    let desc = state.arena.get(rref.desc).expect("record's owning descriptor must exist");
    let key = &desc.array[rref.index];
    desc.tgt_start + key.tgt_offset + (host_addr - record_host_start)
}

/// Resolves a pointee host address to its device address via the
/// overlap-aware probe (§4.1); a pointer clause whose target isn't mapped at
/// all is a contract violation, not a recoverable miss.
fn resolve_pointer_target(state: &DeviceState, fatal: &dyn FatalReporter, pointee_host: u64, target_id: i32) -> u64 {
    match state.index.lookup_pointer_base(pointee_host) {
        Some((record_start, _, rref)) => device_address(state, rref, record_start, pointee_host),
        None => fatal.report(&MapError::PointerTargetUnmapped { pointee_host, target_id }.to_string()),
    }
}

fn write_argument_array(device: &DeviceDescriptor, state: &mut DeviceState, fatal: &dyn FatalReporter, handle: DescHandle, resolved_hostaddrs: &[u64]) {
    let desc = state.arena.get(handle).expect("descriptor just built");
    let mapnum = desc.list.len();
    let mut args = Vec::with_capacity(mapnum);
    for (i, slot) in desc.list.iter().enumerate() {
        let addr = match slot.record {
            Some(rref) => {
                let owner = state.arena.get(rref.desc).expect("record owner must exist");
                let key = &owner.array[rref.index];
                owner.tgt_start + key.tgt_offset
            }
            None => match slot.offset {
                // firstprivate_int / null host address / use_device_ptr:
                // `resolved_hostaddrs` already carries whatever value the
                // argument array should see (the original host address, or
                // the translated device pointer for use_device_ptr).
                ClauseOffset::PassThroughHostAddr => resolved_hostaddrs[i],
                ClauseOffset::Zero => 0,
                ClauseOffset::ComputedFromSibling(addr) => addr,
                ClauseOffset::DeviceOffset(o) => desc.tgt_start + o,
            },
        };
        args.push(addr);
    }
    let bytes: Vec<u8> = args.iter().flat_map(|a| a.to_ne_bytes()).collect();
    if let Err(e) = device.plugin.host_to_dev(device.target_id, desc.tgt_start, &bytes) {
        fatal.report(&MapError::TransferFailed { target_id: device.target_id, source: e }.to_string());
    }
}

/// Bumps an existing record for a newly-seen clause `(host_start, len, op)`,
/// filling `slot` so unmap can reverse exactly this clause later (§4.4.1).
#[allow(clippy::too_many_arguments)]
pub fn map_vars_existing(
    device: &DeviceDescriptor,
    state: &mut DeviceState,
    fatal: &dyn FatalReporter,
    rref: RecordRef,
    record_host_start: u64,
    host_start: u64,
    len: u64,
    op: MapOperation,
    slot: &mut ClauseSlot,
) {
    let record_host_end = {
        let desc = state.arena.get(rref.desc).expect("record owner must exist");
        desc.array[rref.index].host_end
    };
    let host_end = host_start + len;
    if op.is_force() || host_start < record_host_start || host_end > record_host_end {
        fatal.report(
            &MapError::OverlapWithoutContainment {
                host_start,
                host_end,
                record_start: record_host_start,
                record_end: record_host_end,
            }
            .to_string(),
        );
    }

    if op.always_copy_to() {
        let desc = state.arena.get(rref.desc).expect("record owner must exist");
        let key = &desc.array[rref.index];
        let dst = desc.tgt_start + key.tgt_offset + (host_start - record_host_start);
        let len = (host_end - host_start) as usize;
        let bytes = unsafe { std::slice::from_raw_parts(host_start as *const u8, len) };
        if let Err(e) = device.plugin.host_to_dev(device.target_id, dst, bytes) {
            fatal.report(&MapError::TransferFailed { target_id: device.target_id, source: e }.to_string());
        }
    }

    let desc = state.arena.get_mut(rref.desc).expect("record owner must exist");
    desc.array[rref.index].refcount.increment();

    *slot = ClauseSlot {
        record: Some(rref),
        offset: ClauseOffset::PassThroughHostAddr,
        length: host_end - host_start,
        copy_from: op.copy_from(),
        always_copy_from: op.always_copy_from(),
    };
}

/// `map_fields_existing`: a `GOMP_MAP_STRUCT` sibling whose enclosing region
/// is already mapped. Requires the sibling to fall inside the enclosing
/// record (checked by `map_vars_existing`).
#[allow(clippy::too_many_arguments)]
pub fn map_fields_existing(
    device: &DeviceDescriptor,
    state: &mut DeviceState,
    fatal: &dyn FatalReporter,
    enclosing: RecordRef,
    enclosing_host_start: u64,
    host_start: u64,
    len: u64,
    op: MapOperation,
    slot: &mut ClauseSlot,
) {
    map_vars_existing(device, state, fatal, enclosing, enclosing_host_start, host_start, len, op, slot);
}
