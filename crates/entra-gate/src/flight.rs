//! Single-flight refresh coalescing
//!
//! The first caller to need a refresh starts it; everyone who arrives while it
//! is running awaits the same shared future and receives the same result,
//! success or failure.
//!
//! The slot only holds a weak handle. Callers own the strong handles, so when
//! every waiter has been dropped (request cancelled, timeout) the in-flight
//! fetch is dropped with them and the next caller starts a fresh one. A
//! cancelled refresh therefore never leaves a stuck entry behind.

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared, WeakShared};
use parking_lot::Mutex;

/// A refresh that may be awaited by many callers
pub(crate) type Flight<T> = Shared<BoxFuture<'static, T>>;

pub(crate) struct SingleFlight<T> {
    slot: Mutex<Option<WeakShared<BoxFuture<'static, T>>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.slot.lock().is_some())
            .finish()
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The refresh currently running, if any
    pub(crate) fn current(&self) -> Option<Flight<T>> {
        live(self.slot.lock().as_ref())
    }

    /// Join the running refresh, or start one with `start`
    ///
    /// The flag is `true` when this call started the refresh.
    pub(crate) fn join_or_start<F>(&self, start: F) -> (Flight<T>, bool)
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let mut slot = self.slot.lock();
        if let Some(flight) = live(slot.as_ref()) {
            return (flight, false);
        }
        let flight = start().shared();
        *slot = flight.downgrade();
        (flight, true)
    }

    /// Join or start a refresh and wait for its result
    pub(crate) async fn run<F>(&self, start: F) -> T
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let (flight, _) = self.join_or_start(start);
        self.wait(flight).await
    }

    /// Wait for `flight` and release the slot if it still points at it
    pub(crate) async fn wait(&self, flight: Flight<T>) -> T {
        let output = flight.clone().await;
        let mut slot = self.slot.lock();
        let ours = slot
            .as_ref()
            .and_then(WeakShared::upgrade)
            .is_some_and(|current| current.ptr_eq(&flight));
        if ours {
            *slot = None;
        }
        output
    }
}

/// Upgrade the weak handle if the flight is still running
fn live<T: Clone>(weak: Option<&WeakShared<BoxFuture<'static, T>>>) -> Option<Flight<T>> {
    weak.and_then(WeakShared::upgrade)
        .filter(|flight| flight.peek().is_none())
}
