//! `MapError`: typed contract-violation conditions. Every variant here is
//! only ever constructed on a path that immediately hands its `to_string()`
//! to a [`crate::fatal::FatalReporter`] — nothing in this crate returns one
//! to a caller expecting to recover.

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("trying to map into device [{host_start:#x}, {host_end:#x}) when [{record_start:#x}, {record_end:#x}) is already mapped")]
    OverlapWithoutContainment { host_start: u64, host_end: u64, record_start: u64, record_end: u64 },

    #[error("use_device_ptr: host address {host_addr:#x} is not mapped on device {target_id}")]
    UseDevicePtrUnmapped { host_addr: u64, target_id: i32 },

    #[error("GOMP_MAP_FORCE_PRESENT clause was not already mapped")]
    ForcePresentMiss,

    #[error("pointer clause target {pointee_host:#x} is not mapped on device {target_id}")]
    PointerTargetUnmapped { pointee_host: u64, target_id: i32 },

    #[error("target update: [{host_start:#x}, {host_end:#x}) is not fully contained in mapped range [{record_start:#x}, {record_end:#x})")]
    UpdateRangeNotContained { host_start: u64, host_end: u64, record_start: u64, record_end: u64 },

    #[error("unmap_vars: refcount already zero before unmap, bookkeeping bug")]
    RefcountAlreadyZero,

    #[error("descriptor refcount underflow")]
    DescriptorRefcountUnderflow,

    #[error("device {target_id} failed to initialize: {source}")]
    DeviceInitFailed { target_id: i32, source: offload_plugin::PluginError },

    #[error("device {target_id} allocation of {size} bytes failed: {source}")]
    AllocationFailed { target_id: i32, size: u64, source: offload_plugin::PluginError },

    #[error("device transfer on {target_id} failed: {source}")]
    TransferFailed { target_id: i32, source: offload_plugin::PluginError },

    #[error("map engine cannot classify kind byte: {0}")]
    UnhandledKind(#[from] offload_abi::OffloadError),

    #[error("target exit data: unhandled operation at clause {index}")]
    ExitClauseUnhandled { index: usize },

    #[error("plugin failed to load image on device {target_id}: {source}")]
    ImageLoadFailed { target_id: i32, source: offload_plugin::PluginError },

    #[error("plugin failed to unload image on device {target_id}: {source}")]
    ImageUnloadFailed { target_id: i32, source: offload_plugin::PluginError },

    #[error("plugin {plugin} returned {got} address pairs for {want} image table entries")]
    ImageEntryCountMismatch { plugin: String, got: usize, want: usize },

    #[error("offload image version {image} is newer than this host supports ({host})")]
    ImageVersionMismatch { image: u32, host: u32 },
}
