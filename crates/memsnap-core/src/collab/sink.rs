use std::sync::mpsc::Sender;

use tracing::debug;

use crate::error::Result;

/// Receives a completed snapshot (or the error that ended it).
pub trait SnapshotSink<S>: Send {
    fn deliver(&self, outcome: Result<S>);
}

impl<S: Send> SnapshotSink<S> for Sender<Result<S>> {
    fn deliver(&self, outcome: Result<S>) {
        if self.send(outcome).is_err() {
            debug!("Snapshot receiver dropped; result discarded");
        }
    }
}

/// Closure-based sink.
pub struct FnSink<F>(pub F);

impl<S, F> SnapshotSink<S> for FnSink<F>
where
    F: Fn(Result<S>) + Send,
{
    fn deliver(&self, outcome: Result<S>) {
        (self.0)(outcome)
    }
}
