//! The fatal-report primitive for unrecoverable contract violations. Every
//! call site has already released its device lock guard before reaching
//! here.

use std::sync::Arc;

/// Reports an unrecoverable contract violation. The default implementation
/// logs and panics; tests install a recording implementation so a fatal
/// condition can be asserted without aborting the test process.
pub trait FatalReporter: Send + Sync {
    fn report(&self, msg: &str) -> !;
}

/// Logs via `tracing::error!` then panics, unwinding the stack.
#[derive(Debug, Default)]
pub struct PanicReporter;

impl FatalReporter for PanicReporter {
    fn report(&self, msg: &str) -> ! {
        tracing::error!(%msg, "fatal offload contract violation");
        panic!("{msg}");
    }
}

/// Records every report instead of terminating; used by tests that need to
/// observe a fatal condition and keep running.
#[derive(Default)]
pub struct RecordingReporter {
    messages: std::sync::Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("recording reporter poisoned").clone()
    }
}

impl FatalReporter for RecordingReporter {
    fn report(&self, msg: &str) -> ! {
        tracing::error!(%msg, "fatal offload contract violation (recorded, not aborting)");
        self.messages.lock().expect("recording reporter poisoned").push(msg.to_string());
        // A recording reporter exists purely to let tests observe the
        // message; it still cannot return, since callers rely on `!` to
        // short-circuit partially-completed mutations. Tests that use it
        // run the offending call in a `catch_unwind` and assert on the
        // panic payload, not on a normal return.
        std::panic::panic_any(RecordedFatal(msg.to_string()));
    }
}

/// Panic payload carrying the message a [`RecordingReporter`] recorded, for
/// tests that want to assert on exact text after `catch_unwind`.
#[derive(Debug)]
pub struct RecordedFatal(pub String);

pub type SharedReporter = Arc<dyn FatalReporter>;

pub fn default_reporter() -> SharedReporter {
    Arc::new(PanicReporter)
}
