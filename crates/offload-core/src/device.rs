//! A single device descriptor: its plugin handle, capability bits, and the
//! mutex-protected state the map/unmap engines mutate.

use std::sync::{Arc, Mutex, MutexGuard};

use offload_abi::DeviceCapabilities;
use offload_plugin::DevicePlugin;

use crate::descriptor::DescArena;
use crate::interval::IntervalIndex;

/// Everything a device's lock protects: its interval index, its descriptor
/// arena, and the initialization flag. The images still waiting to be
/// loaded live in the registry-wide `ImageRegistry`, behind `register_lock`.
pub struct DeviceState {
    pub initialized: bool,
    pub index: IntervalIndex,
    pub arena: DescArena,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self { initialized: false, index: IntervalIndex::new(), arena: DescArena::new() }
    }
}

/// One device slot in the registry. `target_id` is the index the plugin
/// knows this device by; it need not equal this device's position in
/// [`crate::registry::DeviceRegistry`] once devices are sorted by
/// capability (§4.2).
pub struct DeviceDescriptor {
    pub target_id: i32,
    pub plugin: Arc<dyn DevicePlugin>,
    pub capabilities: DeviceCapabilities,
    pub device_type: String,
    state: Mutex<DeviceState>,
}

impl DeviceDescriptor {
    pub fn new(target_id: i32, plugin: Arc<dyn DevicePlugin>, device_type: String) -> Self {
        let capabilities = plugin.capabilities();
        Self { target_id, plugin, capabilities, device_type, state: Mutex::new(DeviceState::default()) }
    }

    /// Acquire the device lock. Every path that touches the index, the
    /// arena, or calls into the plugin goes through this first.
    pub fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().expect("device lock poisoned by a panicking holder")
    }
}
