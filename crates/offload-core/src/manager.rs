//! Bundles the pieces of global state the original scattered across static
//! variables: the device registry and the fatal-report sink.
//!
//! `offload-host` wraps one of these in a `OnceLock` for its process-wide
//! singleton accessor, mirroring the double-checked `pthread_once` init in
//! the original runtime.

use crate::fatal::{SharedReporter, default_reporter};
use crate::registry::DeviceRegistry;

pub struct OffloadManager {
    pub registry: DeviceRegistry,
    pub fatal: SharedReporter,
}

impl OffloadManager {
    pub fn new(registry: DeviceRegistry) -> Self {
        Self { registry, fatal: default_reporter() }
    }

    pub fn with_reporter(registry: DeviceRegistry, fatal: SharedReporter) -> Self {
        Self { registry, fatal }
    }
}
