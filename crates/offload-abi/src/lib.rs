//! Shared wire-level types for the offload target memory manager.
//!
//! This crate has no knowledge of the interval index, the device registry, or
//! any plugin. It only describes the shapes that cross the boundary between a
//! caller (the offload-region codegen, abstractly) and the mapping engine.

mod capability;
mod device_id;
mod error;
mod kind;
mod offset;
mod table;

pub use capability::DeviceCapabilities;
pub use device_id::DeviceId;
pub use error::{OffloadError, OffloadResult};
pub use kind::{MapKind, PragmaKind};
pub use offset::{ClauseOffset, RefCount};
pub use table::{OffloadImageTable, VarEntry};

/// Sentinel returned by `target_memcpy_rect`'s "maximum supported
/// dimensionality" query: call it with both `dst` and `src` null to get this
/// value back without touching any device.
pub const MAX_RECT_DIMENSIONS: i32 = i32::MAX;
