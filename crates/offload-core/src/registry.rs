//! Device discovery, lazy initialization, and image (de)registration.
//!
//! `register_lock` is always acquired before any individual device's lock
//! and always released last (§5): every method here that needs both takes
//! the registry lock for its whole body and only reaches into a device's
//! own lock from inside that scope.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use offload_abi::{DeviceCapabilities, DeviceId, OffloadError, OffloadImageTable, OffloadResult};
use offload_plugin::DevicePlugin;

use crate::device::DeviceDescriptor;
use crate::error::MapError;
use crate::fatal::FatalReporter;
use crate::image::{self, ImageRegistry, LoadedImage, PendingImage, HOST_IMAGE_VERSION};

/// Sentinel ICV value meaning "no explicit default device has been set";
/// resolves to device 0 when at least one device exists, host fallback
/// otherwise. Mirrors `omp_get_default_device`'s initial value.
const ICV_UNSET: i32 = -1;

pub struct DeviceRegistry {
    devices: Vec<Arc<DeviceDescriptor>>,
    images: Mutex<ImageRegistry>,
    default_device: AtomicI32,
}

impl DeviceRegistry {
    /// Builds a registry from the plugins a `PluginLoader` (or a test
    /// harness) already resolved, sorting so `COMPUTE_LAUNCH`-capable
    /// devices occupy `[0, num_devices_openmp)` per §4.2.
    pub fn new(plugins: Vec<(Arc<dyn DevicePlugin>, String)>) -> Self {
        let mut devices: Vec<Arc<DeviceDescriptor>> = Vec::new();
        for (plugin, device_type) in plugins {
            let count = plugin.num_devices();
            for target_id in 0..count as i32 {
                devices.push(Arc::new(DeviceDescriptor::new(target_id, plugin.clone(), device_type.clone())));
            }
        }
        devices.sort_by_key(|d| !d.capabilities.contains(DeviceCapabilities::COMPUTE_LAUNCH));
        Self { devices, images: Mutex::new(ImageRegistry::new()), default_device: AtomicI32::new(ICV_UNSET) }
    }

    /// Devices usable as an OpenMP compute target, i.e. the
    /// `COMPUTE_LAUNCH`-capable prefix.
    pub fn num_devices_openmp(&self) -> usize {
        self.devices.iter().take_while(|d| d.capabilities.contains(DeviceCapabilities::COMPUTE_LAUNCH)).count()
    }

    pub fn set_default_device(&self, id: i32) {
        self.default_device.store(id, Ordering::SeqCst);
    }

    /// `resolve_device` from §4.2: translates a caller-facing [`DeviceId`]
    /// into a live, lazily-initialized device descriptor, or `None` when the
    /// caller should fall back to host execution.
    pub fn resolve_device(&self, id: DeviceId, fatal: &dyn FatalReporter) -> Option<Arc<DeviceDescriptor>> {
        let numbered = match id {
            DeviceId::HostFallback => return None,
            DeviceId::Icv => {
                let icv = self.default_device.load(Ordering::SeqCst);
                if icv == ICV_UNSET {
                    if self.num_devices_openmp() == 0 {
                        return None;
                    }
                    0
                } else {
                    icv
                }
            }
            DeviceId::Numbered(n) => n,
        };

        if numbered < 0 || numbered as usize >= self.num_devices_openmp() {
            tracing::warn!(device = numbered, "no capable device at this index, falling back to host");
            return None;
        }

        let device = self.devices[numbered as usize].clone();
        self.ensure_initialized(&device, fatal);
        Some(device)
    }

    fn ensure_initialized(&self, device: &DeviceDescriptor, fatal: &dyn FatalReporter) {
        let mut images = self.images.lock().expect("register_lock poisoned");
        let mut state = device.lock();
        if state.initialized {
            return;
        }
        if let Err(e) = device.plugin.init_device(device.target_id) {
            fatal.report(&MapError::DeviceInitFailed { target_id: device.target_id, source: e }.to_string());
        }
        for pending in images.pending_for(&device.device_type) {
            let handle = image::load_image_onto_device(device, &mut state, fatal, pending.version, &pending.table);
            images.record_loaded(LoadedImage {
                version: pending.version,
                device_type: device.device_type.clone(),
                device_target_id: device.target_id,
                desc: handle,
            });
        }
        state.initialized = true;
        tracing::info!(target_id = device.target_id, device_type = %device.device_type, "device initialized");
    }

    /// Registers a host-side image table for every device of `device_type`,
    /// loading immediately onto already-initialized ones and queuing the
    /// rest for their first `resolve_device`. Fatal if `version` is newer
    /// than this host supports.
    pub fn register_image(&self, version: u32, device_type: &str, table: OffloadImageTable, fatal: &dyn FatalReporter) {
        if version > HOST_IMAGE_VERSION {
            fatal.report(&MapError::ImageVersionMismatch { image: version, host: HOST_IMAGE_VERSION }.to_string());
        }
        let mut images = self.images.lock().expect("register_lock poisoned");
        for device in self.devices.iter().filter(|d| d.device_type == device_type) {
            let mut state = device.lock();
            if state.initialized {
                let handle = image::load_image_onto_device(device, &mut state, fatal, version, &table);
                images.record_loaded(LoadedImage {
                    version,
                    device_type: device_type.to_string(),
                    device_target_id: device.target_id,
                    desc: handle,
                });
            }
        }
        images.queue_pending(PendingImage { version, device_type: device_type.to_string(), table });
    }

    /// Reverses [`Self::register_image`]: unloads from every device that had
    /// it loaded, and drops any still-pending queue entry.
    pub fn unregister_image(&self, version: u32, device_type: &str, fatal: &dyn FatalReporter) {
        let mut images = self.images.lock().expect("register_lock poisoned");
        let loaded = images.take_loaded(version, device_type);
        for entry in loaded {
            if let Some(device) = self.devices.iter().find(|d| d.target_id == entry.device_target_id && d.device_type == entry.device_type) {
                let mut state = device.lock();
                image::unload_image_from_device(device, &mut state, fatal, version, entry.desc);
            }
        }
    }

    pub fn device(&self, target_id: i32, device_type: &str) -> OffloadResult<Arc<DeviceDescriptor>> {
        self.devices
            .iter()
            .find(|d| d.target_id == target_id && d.device_type == device_type)
            .cloned()
            .ok_or(OffloadError::UnknownDevice(target_id))
    }
}
