//! The host-side target memory manager: interval index, mapping records,
//! device registry, and the map/unmap/update/exit engines built on them.
//!
//! This crate never talks to a compiler-generated map-clause array or a
//! real plugin shared library directly — it operates on [`offload_abi`]'s
//! wire types and dispatches through [`offload_plugin::DevicePlugin`].
//! `offload-host` is the thin layer that adapts those boundaries to public
//! entry points.

pub mod descriptor;
pub mod device;
pub mod error;
pub mod exit_engine;
pub mod fatal;
pub mod image;
pub mod interval;
pub mod manager;
pub mod map_engine;
pub mod record;
pub mod registry;
pub mod unmap_engine;
pub mod update_engine;

pub use descriptor::{ClauseSlot, DescArena, DescHandle, TargetMemDesc};
pub use device::{DeviceDescriptor, DeviceState};
pub use error::MapError;
pub use exit_engine::ExitRequest;
pub use fatal::{FatalReporter, PanicReporter, RecordingReporter, SharedReporter};
pub use image::{ImageRegistry, LoadedImage, PendingImage};
pub use interval::{IntervalIndex, RecordRef};
pub use manager::OffloadManager;
pub use map_engine::{MapOutcome, MapRequest};
pub use record::Key;
pub use registry::DeviceRegistry;
pub use update_engine::UpdateRequest;
