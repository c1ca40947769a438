//! Handle to a running state subscription.

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A live subscription. Delivery stops on [`Self::unsubscribe`] or drop.
///
/// Cancellation is cooperative: a callback that is already running
/// finishes, and nothing is delivered after it.
#[derive(Debug)]
pub struct Subscription {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Spawn `task`, handing it the receiver it must watch for the stop
    /// signal.
    pub(crate) fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, stopped) = watch::channel(false);
        let handle = tokio::spawn(task(stopped));
        Self { stop, handle }
    }

    /// Stop delivering state changes.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// `true` until the delivery task has exited.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

/// Resolve once `stop` flips to `true` or its sender is gone.
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}
