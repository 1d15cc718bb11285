//! Timer and cancellation primitives shared by search, map-move handling,
//! the camera cool-down and the visit form.
//!
//! [`Debouncer`] collapses a burst of triggers into one call after a quiet
//! period. [`RequestSlot`] tracks the single live request of a component:
//! starting a new request aborts the previous task and bumps a generation
//! counter, so a result that was already queued before the abort is still
//! recognised as stale when it is applied.

use std::future::Future;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};

/// Runs an action once triggers have stopped arriving for `window`.
///
/// Dropping the debouncer cancels a pending action.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    /// (Re)starts the timer. Only the action of the last trigger inside the
    /// window runs.
    pub fn trigger<F>(&mut self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        let window = self.window;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            action();
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Identifies one request issued through a [`RequestSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken {
    generation: u64,
}

/// Holds at most one live request. Only the live token's result may be
/// applied; everything else is discarded on arrival.
#[derive(Debug, Default)]
pub struct RequestSlot {
    generation: u64,
    live: Option<u64>,
    in_flight: Option<AbortHandle>,
}

impl RequestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supersedes any outstanding request and hands out a fresh token
    /// without spawning anything.
    pub fn begin(&mut self) -> RequestToken {
        self.abort_in_flight();
        self.generation += 1;
        self.live = Some(self.generation);
        RequestToken {
            generation: self.generation,
        }
    }

    /// Supersedes any outstanding request and spawns a new one. The task
    /// receives its own token so it can tag whatever it reports back.
    pub fn launch<F, Fut>(&mut self, make: F) -> RequestToken
    where
        F: FnOnce(RequestToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.begin();
        let handle = tokio::spawn(make(token));
        self.in_flight = Some(handle.abort_handle());
        token
    }

    pub fn is_live(&self, token: RequestToken) -> bool {
        self.live == Some(token.generation)
    }

    /// Marks `token` as resolved. Returns `false` when the token was
    /// superseded or cancelled, in which case the caller must drop the
    /// result.
    pub fn settle(&mut self, token: RequestToken) -> bool {
        if !self.is_live(token) {
            return false;
        }
        self.live = None;
        self.in_flight = None;
        true
    }

    /// Aborts the outstanding request, if any. No token issued so far will
    /// be accepted afterwards.
    pub fn cancel(&mut self) {
        self.abort_in_flight();
        self.live = None;
    }

    pub fn is_in_flight(&self) -> bool {
        self.live.is_some()
    }

    fn abort_in_flight(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

impl Drop for RequestSlot {
    fn drop(&mut self) {
        self.abort_in_flight();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn only_last_trigger_in_window_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(Duration::from_millis(500));

        for value in 1..=3 {
            let tx = tx.clone();
            debouncer.trigger(move || {
                tx.send(value).ok();
            });
            sleep(Duration::from_millis(100)).await;
        }
        assert!(rx.try_recv().is_err(), "fired before the quiet period");

        sleep(Duration::from_millis(500)).await;
        assert_eq!(rx.try_recv().ok(), Some(3));
        assert!(rx.try_recv().is_err());
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_debouncer_cancels_pending_action() {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        {
            let mut debouncer = Debouncer::new(Duration::from_millis(200));
            debouncer.trigger(move || {
                tx.send(()).ok();
            });
        }
        sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn new_request_aborts_and_invalidates_previous() {
        let mut slot = RequestSlot::new();
        let (mut first_tx, first_rx) = oneshot::channel::<()>();

        let first = slot.launch(|_| async move {
            first_rx.await.ok();
        });
        let second = slot.begin();

        // The aborted task drops its receiver.
        tokio::time::timeout(Duration::from_secs(1), first_tx.closed())
            .await
            .expect("superseded task was not aborted");

        assert!(!slot.is_live(first));
        assert!(!slot.settle(first));
        assert!(slot.settle(second));
        assert!(!slot.is_in_flight());
    }

    #[tokio::test]
    async fn cancel_rejects_every_outstanding_token() {
        let mut slot = RequestSlot::new();
        let token = slot.begin();
        slot.cancel();
        assert!(!slot.settle(token));
        assert_ne!(slot.begin(), token);
    }
}
