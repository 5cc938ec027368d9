use crate::error::PluginError;
use offload_abi::{DeviceCapabilities, OffloadImageTable};

/// A `{device_start, device_end}` pair, as returned by `load_image` for each
/// function and variable in the table, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrPair {
    pub start: u64,
    pub end: u64,
}

/// The capability set a device plugin implements.
///
/// A "device address" here is whatever opaque `u64` the plugin uses to
/// identify a location in its own address space; this crate never
/// dereferences it directly, only passes it back to the plugin.
pub trait DevicePlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Plugin ABI version; compared against the host's own version before
    /// any image is registered against a device of this type.
    fn version(&self) -> u32;

    fn capabilities(&self) -> DeviceCapabilities;

    /// A stable tag identifying the target type this plugin serves, used to
    /// match offload images against devices.
    fn device_type(&self) -> &str;

    fn num_devices(&self) -> u32;

    fn init_device(&self, target_id: i32) -> Result<(), PluginError>;

    fn fini_device(&self, target_id: i32) -> Result<(), PluginError>;

    /// Load `table` onto `target_id`, returning one `AddrPair` per function
    /// then per variable, in table order.
    fn load_image(&self, target_id: i32, version: u32, table: &OffloadImageTable) -> Result<Vec<AddrPair>, PluginError>;

    fn unload_image(&self, target_id: i32, version: u32) -> Result<(), PluginError>;

    /// Allocate `size` bytes on the device, returning the *unaligned* base
    /// address; the caller is responsible for aligning it.
    fn alloc(&self, target_id: i32, size: u64) -> Result<u64, PluginError>;

    fn free(&self, target_id: i32, addr: u64) -> Result<(), PluginError>;

    fn host_to_dev(&self, target_id: i32, dst: u64, src: &[u8]) -> Result<(), PluginError>;

    fn dev_to_host(&self, target_id: i32, dst: &mut [u8], src: u64) -> Result<(), PluginError>;

    /// Required when [`DeviceCapabilities::COMPUTE_LAUNCH`] is set.
    fn dev_to_dev(&self, target_id: i32, dst: u64, src: u64, len: u64) -> Result<(), PluginError> {
        let _ = (target_id, dst, src, len);
        Err(PluginError::Unsupported("dev2dev"))
    }

    /// Required when [`DeviceCapabilities::COMPUTE_LAUNCH`] is set. Runs the
    /// function at `fn_addr` with the argument array at `args_addr`.
    fn run(&self, target_id: i32, fn_addr: u64, args_addr: u64) -> Result<(), PluginError> {
        let _ = (target_id, fn_addr, args_addr);
        Err(PluginError::Unsupported("run"))
    }
}
