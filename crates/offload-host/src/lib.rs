//! The public surface a compiler-generated offload region (or an
//! `omp_target_*` call site) links against: configuration, the thread-local
//! `target data` stack, host fallback, and the entry points themselves.
//!
//! This crate is the thin adapter between [`offload_core`]'s engines and the
//! process-wide, C-callable surface a real runtime would export; the engines
//! themselves never know about the singleton manager or the thread-local
//! stack defined here.

pub mod config;
pub mod entry;
pub mod fallback;
pub mod task_scheduler;
pub mod thread_state;

pub use config::OffloadConfig;
pub use entry::{
    manager, scheduler, set_scheduler, target, target_alloc, target_associate_ptr, target_data_begin, target_data_end,
    target_disassociate_ptr, target_enter_exit_data, target_free, target_is_present, target_memcpy, target_memcpy_rect,
    target_update, target_with_deps,
};
pub use task_scheduler::{DependToken, NoopScheduler, TaskScheduler};
pub use thread_state::DataRegion;
