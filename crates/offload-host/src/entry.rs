//! Public entry points a compiler-generated offload region calls into
//! (§4.8): `target`/`target_with_deps`, the `target data` stack, update,
//! enter/exit data, and the user-level `omp_target_*` memory APIs.
//!
//! Every function here either takes an explicit `&OffloadManager` (for
//! tests and embedders that build their own) or goes through [`manager`],
//! the process-wide singleton lazily built from [`OffloadConfig::from_env`].

use std::sync::{Arc, OnceLock};

use offload_abi::{DeviceId, MapKind, MapOperation, OffloadError, OffloadResult, PragmaKind, RefCount};
use offload_core::{
    exit_engine, map_engine, unmap_engine, update_engine, DeviceDescriptor, ExitRequest, Key, MapRequest,
    OffloadManager, TargetMemDesc, UpdateRequest,
};
use offload_plugin::PluginLoader;

use crate::config::OffloadConfig;
use crate::fallback;
use crate::task_scheduler::{DependToken, NoopScheduler, TaskScheduler};
use crate::thread_state::{self, DataRegion};

static MANAGER: OnceLock<OffloadManager> = OnceLock::new();
static SCHEDULER: OnceLock<Arc<dyn TaskScheduler>> = OnceLock::new();

/// The process-wide manager, built on first use from `OffloadConfig::from_env`
/// and never torn down, mirroring the original's `pthread_once`-guarded
/// global state (§9).
pub fn manager() -> &'static OffloadManager {
    MANAGER.get_or_init(|| build_manager(&OffloadConfig::from_env()))
}

/// The process-wide task scheduler; defaults to [`NoopScheduler`] until an
/// embedder installs a real one via [`set_scheduler`].
pub fn scheduler() -> &'static dyn TaskScheduler {
    SCHEDULER.get_or_init(|| Arc::new(NoopScheduler)).as_ref()
}

/// Installs a task scheduler before any offload call is made. Returns the
/// scheduler back if one was already installed.
pub fn set_scheduler(sched: Arc<dyn TaskScheduler>) -> Result<(), Arc<dyn TaskScheduler>> {
    SCHEDULER.set(sched)
}

fn build_manager(config: &OffloadConfig) -> OffloadManager {
    let mut plugins = Vec::new();
    if !config.host_fallback_only {
        let loader = PluginLoader::new(config.plugin_search_path.clone());
        for name in &config.target_list {
            match loader.load(name) {
                Ok(plugin) => {
                    let device_type = plugin.device_type().to_string();
                    plugins.push((plugin, device_type));
                }
                Err(e) => tracing::warn!(target = %name, error = %e, "offload plugin unavailable"),
            }
        }
    }
    OffloadManager::new(offload_core::DeviceRegistry::new(plugins))
}

fn decode_operations(manager: &OffloadManager, kinds: &[MapKind]) -> Vec<MapOperation> {
    kinds.iter().map(|k| k.operation().unwrap_or_else(|e| manager.fatal.report(&e.to_string()))).collect()
}

/// `target(device, fn, mapnum, hostaddrs, sizes, kinds)`: map, run, unmap,
/// synchronously. `host_fallback` is invoked in place of a device launch
/// when no capable device resolves.
pub fn target(
    manager: &OffloadManager,
    device: DeviceId,
    fn_addr: u64,
    hostaddrs: &[u64],
    sizes: &[u64],
    kinds: &[MapKind],
    host_fallback: impl FnOnce(),
) {
    let Some(dev) = manager.registry.resolve_device(device, manager.fatal.as_ref()) else {
        fallback::run_on_host(host_fallback);
        return;
    };

    let req = MapRequest { pragma: PragmaKind::Target, hostaddrs, sizes, kinds, devaddrs: None };
    let (handle, tgt_start) = {
        let mut state = dev.lock();
        let outcome = map_engine::map_vars(&dev, &mut state, manager.fatal.as_ref(), &req);
        let handle = outcome.desc.expect("a target pragma's map always produces a descriptor");
        let tgt_start = state.arena.get(handle).expect("descriptor just built").tgt_start;
        (handle, tgt_start)
    };

    if let Err(e) = dev.plugin.run(dev.target_id, fn_addr, tgt_start) {
        manager.fatal.report(&format!("device {} run failed: {e}", dev.target_id));
    }

    let mut state = dev.lock();
    unmap_engine::unmap_vars(&dev, &mut state, manager.fatal.as_ref(), handle, true);
}

/// `target_with_deps`: as [`target`], routing `NOWAIT`/`depend` handling
/// through the installed [`TaskScheduler`].
#[allow(clippy::too_many_arguments)]
pub fn target_with_deps(
    manager: &'static OffloadManager,
    device: DeviceId,
    fn_addr: u64,
    hostaddrs: Vec<u64>,
    sizes: Vec<u64>,
    kinds: Vec<MapKind>,
    nowait: bool,
    depend: DependToken,
    host_fallback: impl FnOnce() + Send + 'static,
) {
    let sched = scheduler();
    if nowait {
        sched.defer(
            depend,
            Box::new(move || target(manager, device, fn_addr, &hostaddrs, &sizes, &kinds, host_fallback)),
        );
    } else {
        sched.block_until_ready(&depend);
        target(manager, device, fn_addr, &hostaddrs, &sizes, &kinds, host_fallback);
    }
}

/// `target_data_begin`: maps `hostaddrs` and, if anything was mapped, pushes
/// a [`DataRegion`] for the matching `target_data_end` to unwind. A no-op
/// when no capable device resolves.
pub fn target_data_begin(manager: &OffloadManager, device: DeviceId, hostaddrs: &[u64], sizes: &[u64], kinds: &[MapKind]) {
    let Some(dev) = manager.registry.resolve_device(device, manager.fatal.as_ref()) else {
        return;
    };
    let req = MapRequest { pragma: PragmaKind::Data, hostaddrs, sizes, kinds, devaddrs: None };
    let outcome = {
        let mut state = dev.lock();
        map_engine::map_vars(&dev, &mut state, manager.fatal.as_ref(), &req)
    };
    if let Some(desc) = outcome.desc {
        thread_state::push(DataRegion { device_type: dev.device_type.clone(), target_id: dev.target_id, desc });
    }
}

/// `target_data_end`: pops the thread's innermost `target data` region and
/// unmaps it. A no-op if the stack is empty (the matching `begin` fell back
/// to the host and pushed nothing).
pub fn target_data_end(manager: &OffloadManager) {
    let Some(region) = thread_state::pop() else {
        return;
    };
    let dev = match manager.registry.device(region.target_id, &region.device_type) {
        Ok(dev) => dev,
        Err(e) => manager.fatal.report(&format!("target_data_end: {e}")),
    };
    let mut state = dev.lock();
    unmap_engine::unmap_vars(&dev, &mut state, manager.fatal.as_ref(), region.desc, true);
}

/// `target_update`: re-copies already-mapped ranges per §4.6. A no-op when
/// no capable device resolves.
pub fn target_update(manager: &OffloadManager, device: DeviceId, hostaddrs: &[u64], sizes: &[u64], kinds: &[MapKind]) {
    let Some(dev) = manager.registry.resolve_device(device, manager.fatal.as_ref()) else {
        return;
    };
    let operations = decode_operations(manager, kinds);
    let req = UpdateRequest { hostaddrs, sizes, operations: &operations };
    let state = dev.lock();
    update_engine::update(&dev, &state, manager.fatal.as_ref(), &req);
}

/// `target_enter_exit_data`: dispatches on `is_exit` to either the map
/// engine (`enter data`) or the exit-data engine (`exit data`). A no-op when
/// no capable device resolves.
pub fn target_enter_exit_data(
    manager: &OffloadManager,
    device: DeviceId,
    hostaddrs: &[u64],
    sizes: &[u64],
    kinds: &[MapKind],
    is_exit: bool,
) {
    let Some(dev) = manager.registry.resolve_device(device, manager.fatal.as_ref()) else {
        return;
    };
    if is_exit {
        let operations = decode_operations(manager, kinds);
        let req = ExitRequest { hostaddrs, sizes, operations: &operations };
        let mut state = dev.lock();
        exit_engine::exit_data(&dev, &mut state, manager.fatal.as_ref(), &req);
    } else {
        let req = MapRequest { pragma: PragmaKind::EnterData, hostaddrs, sizes, kinds, devaddrs: None };
        let mut state = dev.lock();
        map_engine::map_vars(&dev, &mut state, manager.fatal.as_ref(), &req);
    }
}

/// Resolves a raw `omp_target_*` device number per §4.8: `HostFallback`
/// resolves to `None` (caller does host malloc/free), a negative numbered
/// id is an error, and an out-of-range id is an error.
fn resolve_user_device(manager: &OffloadManager, device_num: i32) -> OffloadResult<Option<Arc<DeviceDescriptor>>> {
    match DeviceId::from_raw(device_num) {
        DeviceId::HostFallback => Ok(None),
        DeviceId::Numbered(n) if n < 0 => Err(OffloadError::NegativeDeviceId(n)),
        id => manager
            .registry
            .resolve_device(id, manager.fatal.as_ref())
            .map(Some)
            .ok_or(OffloadError::UnknownDevice(device_num)),
    }
}

fn host_alloc(size: u64) -> u64 {
    (unsafe { libc::malloc(size as usize) }) as u64
}

fn host_free(addr: u64) {
    if addr != 0 {
        unsafe { libc::free(addr as *mut libc::c_void) };
    }
}

/// `target_alloc`: returns `0` (a null device pointer) if the underlying
/// allocator fails, matching `omp_target_alloc`'s contract rather than
/// treating allocator exhaustion as fatal.
pub fn target_alloc(manager: &OffloadManager, device_num: i32, size: u64) -> OffloadResult<u64> {
    Ok(match resolve_user_device(manager, device_num)? {
        None => host_alloc(size),
        Some(dev) => dev.plugin.alloc(dev.target_id, size).unwrap_or(0),
    })
}

pub fn target_free(manager: &OffloadManager, device_num: i32, addr: u64) -> OffloadResult<()> {
    match resolve_user_device(manager, device_num)? {
        None => host_free(addr),
        Some(dev) => {
            if let Err(e) = dev.plugin.free(dev.target_id, addr) {
                manager.fatal.report(&format!("target_free on device {} failed: {e}", dev.target_id));
            }
        }
    }
    Ok(())
}

pub fn target_is_present(manager: &OffloadManager, device_num: i32, host_addr: u64, size: u64) -> OffloadResult<bool> {
    Ok(match resolve_user_device(manager, device_num)? {
        None => true,
        Some(dev) => {
            let state = dev.lock();
            let end = host_addr + size.max(1);
            state.index.lookup(host_addr, end).is_some()
        }
    })
}

/// `target_memcpy`: copies `length` bytes from `src + src_offset` to
/// `dst + dst_offset`. Either side may be a host pointer (`device_num ==
/// omp_initial_device`, i.e. [`DeviceId::HostFallback`]); a copy between two
/// distinct devices bounces through a host buffer rather than requiring a
/// vendor `dev2dev` path across devices.
#[allow(clippy::too_many_arguments)]
pub fn target_memcpy(
    manager: &OffloadManager,
    dst_device_num: i32,
    src_device_num: i32,
    dst: u64,
    src: u64,
    length: u64,
    dst_offset: u64,
    src_offset: u64,
) -> OffloadResult<()> {
    let dst_dev = resolve_user_device(manager, dst_device_num)?;
    let src_dev = resolve_user_device(manager, src_device_num)?;
    let len = length as usize;

    match (dst_dev, src_dev) {
        (None, None) => unsafe {
            std::ptr::copy((src + src_offset) as *const u8, (dst + dst_offset) as *mut u8, len);
        },
        (Some(d), None) => {
            let bytes = unsafe { std::slice::from_raw_parts((src + src_offset) as *const u8, len) };
            if let Err(e) = d.plugin.host_to_dev(d.target_id, dst + dst_offset, bytes) {
                manager.fatal.report(&format!("target_memcpy host->device {} failed: {e}", d.target_id));
            }
        }
        (None, Some(s)) => {
            let bytes = unsafe { std::slice::from_raw_parts_mut((dst + dst_offset) as *mut u8, len) };
            if let Err(e) = s.plugin.dev_to_host(s.target_id, bytes, src + src_offset) {
                manager.fatal.report(&format!("target_memcpy device {}->host failed: {e}", s.target_id));
            }
        }
        (Some(d), Some(s)) if Arc::ptr_eq(&d, &s) => {
            if let Err(e) = d.plugin.dev_to_dev(d.target_id, dst + dst_offset, src + src_offset, length) {
                manager.fatal.report(&format!("target_memcpy device {} internal copy failed: {e}", d.target_id));
            }
        }
        (Some(d), Some(s)) => {
            let mut buf = vec![0u8; len];
            if let Err(e) = s.plugin.dev_to_host(s.target_id, &mut buf, src + src_offset) {
                manager.fatal.report(&format!("target_memcpy cross-device read from {} failed: {e}", s.target_id));
            }
            if let Err(e) = d.plugin.host_to_dev(d.target_id, dst + dst_offset, &buf) {
                manager.fatal.report(&format!("target_memcpy cross-device write to {} failed: {e}", d.target_id));
            }
        }
    }
    Ok(())
}

/// Linear byte offset of `offsets` into a row-major array shaped `dims`.
fn rect_offset(dims: &[u64], offsets: &[u64], element_size: u64) -> OffloadResult<u64> {
    let mut stride = element_size;
    let mut offset = 0u64;
    for i in (0..dims.len()).rev() {
        let term = offsets[i].checked_mul(stride).ok_or(OffloadError::RectArithmeticOverflow)?;
        offset = offset.checked_add(term).ok_or(OffloadError::RectArithmeticOverflow)?;
        stride = stride.checked_mul(dims[i]).ok_or(OffloadError::RectArithmeticOverflow)?;
    }
    Ok(offset)
}

/// `target_memcpy_rect`: copies a rectangular (possibly multi-dimensional)
/// sub-array between two buffers laid out with different strides.
///
/// Calling with both `dst == 0` and `src == 0` is the dimensionality query
/// described in `offload_abi::MAX_RECT_DIMENSIONS`'s doc comment and returns
/// that constant without touching any device.
#[allow(clippy::too_many_arguments)]
pub fn target_memcpy_rect(
    manager: &OffloadManager,
    dst_device_num: i32,
    src_device_num: i32,
    dst: u64,
    src: u64,
    element_size: u64,
    volume: &[u64],
    dst_offsets: &[u64],
    src_offsets: &[u64],
    dst_dimensions: &[u64],
    src_dimensions: &[u64],
) -> OffloadResult<i32> {
    if dst == 0 && src == 0 {
        return Ok(offload_abi::MAX_RECT_DIMENSIONS);
    }

    let dst_dev = resolve_user_device(manager, dst_device_num)?;
    let src_dev = resolve_user_device(manager, src_device_num)?;
    if let (Some(d), Some(s)) = (&dst_dev, &src_dev) {
        if !Arc::ptr_eq(d, s) {
            return Err(OffloadError::CrossDeviceRectCopy);
        }
    }

    let dims = volume.len();
    if dims == 0 {
        return Ok(0);
    }
    let row_len = volume[dims - 1];
    let row_bytes = row_len.checked_mul(element_size).ok_or(OffloadError::RectArithmeticOverflow)?;
    let outer = &volume[..dims - 1];

    let mut counters = vec![0u64; outer.len()];
    loop {
        let mut dst_idx: Vec<u64> = dst_offsets[..dims - 1].iter().zip(&counters).map(|(o, c)| o + c).collect();
        let mut src_idx: Vec<u64> = src_offsets[..dims - 1].iter().zip(&counters).map(|(o, c)| o + c).collect();
        dst_idx.push(dst_offsets[dims - 1]);
        src_idx.push(src_offsets[dims - 1]);

        let dst_off = rect_offset(dst_dimensions, &dst_idx, element_size)?;
        let src_off = rect_offset(src_dimensions, &src_idx, element_size)?;
        target_memcpy(manager, dst_device_num, src_device_num, dst, src, row_bytes, dst_off, src_off)?;

        if outer.is_empty() {
            return Ok(0);
        }
        let mut k = outer.len();
        loop {
            if k == 0 {
                return Ok(0);
            }
            k -= 1;
            counters[k] += 1;
            if counters[k] < outer[k] {
                break;
            }
            counters[k] = 0;
            if k == 0 {
                return Ok(0);
            }
        }
    }
}

/// `target_associate_ptr`: pins a caller-supplied device allocation to a
/// host address with a `Pinned` refcount, so ordinary map/unmap traffic on
/// that range resolves to it but never reclaims it.
pub fn target_associate_ptr(
    manager: &OffloadManager,
    device_num: i32,
    host_ptr: u64,
    device_ptr: u64,
    size: u64,
    device_offset: u64,
) -> OffloadResult<()> {
    let dev = resolve_user_device(manager, device_num)?.ok_or(OffloadError::UnknownDevice(device_num))?;
    let mut state = dev.lock();
    if state.index.lookup(host_ptr, host_ptr + size).is_some() {
        return Err(OffloadError::AssociateCollision);
    }

    let handle = state.arena.insert(TargetMemDesc {
        tgt_start: device_ptr,
        tgt_end: device_ptr + size,
        // Not owned by us: associate_ptr never frees memory the caller
        // allocated, so there is nothing for this descriptor to pass to
        // the plugin's `free`.
        to_free: 0,
        array: Vec::new(),
        list: Vec::new(),
        refcount: 1,
        prev: None,
        device_target_id: dev.target_id,
    });
    let key = Key {
        host_start: host_ptr,
        host_end: host_ptr + size,
        tgt_offset: device_offset,
        tgt: handle,
        refcount: RefCount::Pinned,
        async_refcount: 0,
    };
    let desc = state.arena.get_mut(handle).expect("descriptor just inserted");
    desc.array.push(key);
    let rref = offload_core::RecordRef { desc: handle, index: 0 };
    state.index.insert(host_ptr, host_ptr + size, rref);
    Ok(())
}

/// `target_disassociate_ptr`: reverses [`target_associate_ptr`]. Errors if
/// `host_ptr` was never associated (or was already disassociated).
pub fn target_disassociate_ptr(manager: &OffloadManager, device_num: i32, host_ptr: u64) -> OffloadResult<()> {
    let dev = resolve_user_device(manager, device_num)?.ok_or(OffloadError::UnknownDevice(device_num))?;
    let mut state = dev.lock();
    let (record_start, rref) = match state.index.lookup(host_ptr, host_ptr) {
        Some((s, _, r)) if s == host_ptr => (s, r),
        _ => return Err(OffloadError::NotAssociated),
    };
    state.index.remove(record_start);
    state.arena.remove(rref.desc);
    Ok(())
}
