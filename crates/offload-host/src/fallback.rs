//! Host-fallback execution (taxonomy kind 3 in `OffloadError`'s sibling
//! contract-violation taxonomy): when no capable device resolves, the
//! offload region runs in-process instead of failing the call.

/// Runs `body` inline on the calling thread.
///
/// A codegen-integrated runtime would snapshot and restore per-thread ICVs
/// around this call so a region that mutates, say, the default-device ICV
/// doesn't leak state across the fallback boundary. This crate carries no
/// ICV state beyond the `target data` region stack in [`crate::thread_state`],
/// which a plain inline call leaves untouched, so there is nothing to
/// snapshot here yet.
pub fn run_on_host(body: impl FnOnce()) {
    tracing::debug!("no capable device resolved, falling back to host execution");
    body();
}
