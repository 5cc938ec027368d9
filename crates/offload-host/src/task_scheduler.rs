//! Hook point for `NOWAIT` and `depend` clause handling. The task/dependency
//! scheduler is an external collaborator (out of scope here); this trait is
//! the seam a real scheduler implementation plugs into.

/// An opaque dependency token, as the scheduler would understand it. This
/// crate never inspects it — it only threads it through to the scheduler.
pub struct DependToken(pub Vec<u64>);

pub trait TaskScheduler: Send + Sync {
    /// Queues `work` to run once `depend` is satisfied, returning
    /// immediately. Called only when the region carries `NOWAIT`.
    fn defer(&self, depend: DependToken, work: Box<dyn FnOnce() + Send>);

    /// Blocks the calling task until `depend` is satisfied. Called when
    /// `NOWAIT` can't be honored locally (e.g. no scheduler is attached).
    fn block_until_ready(&self, depend: &DependToken);
}

/// Runs everything inline: `defer` executes synchronously, and there is
/// never anything to wait for. Suitable for a program with no task/depend
/// clauses in play, and for tests.
#[derive(Debug, Default)]
pub struct NoopScheduler;

impl TaskScheduler for NoopScheduler {
    fn defer(&self, _depend: DependToken, work: Box<dyn FnOnce() + Send>) {
        work();
    }

    fn block_until_ready(&self, _depend: &DependToken) {}
}
