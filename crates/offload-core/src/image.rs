//! Offload image registration: turning a host-side symbol table into a
//! `Pinned` synthetic descriptor on every device that can take it.

use offload_abi::{OffloadImageTable, RefCount};

use crate::descriptor::{DescHandle, TargetMemDesc};
use crate::device::{DeviceDescriptor, DeviceState};
use crate::error::MapError;
use crate::fatal::FatalReporter;
use crate::interval::RecordRef;
use crate::record::Key;

/// An image that arrived before any device of its target type had
/// initialized; consumed by [`crate::registry::DeviceRegistry::resolve_device`]
/// the first time a matching device comes up.
#[derive(Clone)]
pub struct PendingImage {
    pub version: u32,
    pub device_type: String,
    pub table: OffloadImageTable,
}

/// Bookkeeping for an image that has actually been loaded onto one device,
/// so `unregister` can find it again.
pub struct LoadedImage {
    pub version: u32,
    pub device_type: String,
    pub device_target_id: i32,
    pub desc: DescHandle,
}

/// Images waiting for a device, plus a record of what has already loaded.
/// Lives behind the registry's `register_lock`, which is always acquired
/// before any individual device's lock (§5).
#[derive(Default)]
pub struct ImageRegistry {
    pending: Vec<PendingImage>,
    loaded: Vec<LoadedImage>,
}

impl ImageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_pending(&mut self, image: PendingImage) {
        self.pending.push(image);
    }

    pub fn pending_for(&self, device_type: &str) -> Vec<PendingImage> {
        self.pending.iter().filter(|p| p.device_type == device_type).cloned().collect()
    }

    pub fn record_loaded(&mut self, loaded: LoadedImage) {
        self.loaded.push(loaded);
    }

    /// Removes and returns every loaded-image record matching `version` and
    /// `device_type`, across every device they landed on.
    pub fn take_loaded(&mut self, version: u32, device_type: &str) -> Vec<LoadedImage> {
        let (matching, rest) = std::mem::take(&mut self.loaded)
            .into_iter()
            .partition(|l| l.version == version && l.device_type == device_type);
        self.loaded = rest;
        matching
    }
}

/// Host-side offload image ABI version; a caller-registered image table
/// whose `version` exceeds this is rejected rather than loaded. Mirrors
/// `offload_plugin`'s `HOST_VERSION` check for the plugin ABI itself.
pub const HOST_IMAGE_VERSION: u32 = 1;

/// Asks `device`'s plugin to load `table`, builds one `Pinned` synthetic
/// descriptor holding a record per function and per variable, and inserts
/// them all into the device's index. Fatal if the plugin's address-pair
/// count doesn't match the table. Callers are expected to have already
/// rejected a too-new `version` via [`HOST_IMAGE_VERSION`].
pub fn load_image_onto_device(
    device: &DeviceDescriptor,
    state: &mut DeviceState,
    fatal: &dyn FatalReporter,
    version: u32,
    table: &OffloadImageTable,
) -> DescHandle {
    let pairs = match device.plugin.load_image(device.target_id, version, table) {
        Ok(pairs) => pairs,
        Err(e) => fatal.report(&MapError::ImageLoadFailed { target_id: device.target_id, source: e }.to_string()),
    };
    if pairs.len() != table.num_entries() {
        fatal.report(
            &MapError::ImageEntryCountMismatch {
                plugin: device.plugin.name().to_string(),
                got: pairs.len(),
                want: table.num_entries(),
            }
            .to_string(),
        );
    }

    let handle = state.arena.insert(TargetMemDesc {
        tgt_start: 0,
        tgt_end: 0,
        to_free: 0,
        array: Vec::new(),
        list: Vec::new(),
        refcount: 0,
        prev: None,
        device_target_id: device.target_id,
    });

    let mut array = Vec::with_capacity(table.num_entries());
    for (i, pair) in pairs.iter().enumerate() {
        let (host_start, host_end) = if i < table.num_funcs() {
            let addr = table.functions[i];
            (addr, addr + 1)
        } else {
            let var = &table.variables[i - table.num_funcs()];
            (var.host_addr, var.host_addr + var.size)
        };
        array.push(Key { host_start, host_end, tgt_offset: pair.start, tgt: handle, refcount: RefCount::Pinned, async_refcount: 0 });
    }

    for (i, key) in array.iter().enumerate() {
        state.index.insert(key.host_start, key.host_end, RecordRef { desc: handle, index: i });
    }

    let desc = state.arena.get_mut(handle).expect("descriptor just inserted");
    let count = array.len() as u64;
    desc.array = array;
    desc.refcount = count;

    tracing::info!(target_id = device.target_id, entries = table.num_entries(), "loaded offload image onto device");

    handle
}

/// Reverses [`load_image_onto_device`]: unloads the plugin image, then
/// removes every record it owned from the index and frees the synthetic
/// descriptor.
pub fn unload_image_from_device(device: &DeviceDescriptor, state: &mut DeviceState, fatal: &dyn FatalReporter, version: u32, handle: DescHandle) {
    if let Err(e) = device.plugin.unload_image(device.target_id, version) {
        fatal.report(&MapError::ImageUnloadFailed { target_id: device.target_id, source: e }.to_string());
    }
    let desc = state.arena.remove(handle).expect("image descriptor must still be present");
    for key in &desc.array {
        state.index.remove(key.host_start);
    }
    tracing::info!(target_id = device.target_id, "unloaded offload image from device");
}
