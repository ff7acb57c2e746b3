use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

/// A fetch that any number of loads can await; the output is cloned to each.
pub type SharedFetch<O> = Shared<BoxFuture<'static, O>>;

/// Tracks the single fetch in flight for one cache slot.
pub(crate) struct InFlight<O: Clone> {
    slot: Mutex<Option<SharedFetch<O>>>,
}

impl<O> InFlight<O>
where
    O: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Join the running fetch, or install the one built by `start`.
    ///
    /// The boolean is `true` when `start` was called.
    pub(crate) fn join_or_start<F>(&self, start: F) -> (SharedFetch<O>, bool)
    where
        F: FnOnce() -> BoxFuture<'static, O>,
    {
        let mut slot = self.slot.lock();

        if let Some(running) = slot.as_ref() {
            // A completed fetch stays in the slot until replaced
            if running.peek().is_none() {
                return (running.clone(), false);
            }
        }

        let fetch = start().shared();
        *slot = Some(fetch.clone());
        (fetch, true)
    }

    /// Forget the running fetch; it still completes but new loads won't join it.
    pub(crate) fn detach(&self) -> bool {
        match self.slot.lock().take() {
            Some(running) => running.peek().is_none(),
            None => false,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.slot
            .lock()
            .as_ref()
            .is_some_and(|running| running.peek().is_none())
    }
}
