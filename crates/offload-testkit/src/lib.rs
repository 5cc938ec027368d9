//! In-process test doubles for the offload runtime: currently just
//! [`MockPlugin`], used by `offload-core`'s own tests and by
//! `offload-host`'s integration suite.

mod mock_plugin;

pub use mock_plugin::MockPlugin;
