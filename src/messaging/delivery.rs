//! Cancellable background delivery loops

use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One background loop forwarding broker messages to a handler.
///
/// The loop receives its own [`CancellationToken`] and is expected to
/// `select!` on it next to every blocking receive, so cancellation is observed
/// between deliveries and never in the middle of a handler call. Dropping the
/// task cancels it.
pub(crate) struct DeliveryTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl DeliveryTask {
    /// Spawn `run` on the current tokio runtime
    pub(crate) fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(cancel.clone()));
        Self { cancel, handle }
    }

    /// Signal the loop to stop; it may finish draining asynchronously
    pub(crate) fn stop(&self) {
        self.cancel.cancel();
    }

    /// True once the loop has returned
    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for DeliveryTask {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            self.cancel.cancel();
        }
    }
}
