use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use client_logging::client_debug;
use docsearch_core::OperationKey;
use futures_util::future::{BoxFuture, FutureExt, Shared, WeakShared};

/// Handle to an outcome that every joiner of one key observes.
pub type Pending<T> = Shared<BoxFuture<'static, T>>;

struct Slot<T> {
    generation: u64,
    outcome: WeakShared<BoxFuture<'static, T>>,
}

struct RegistryState<T> {
    next_generation: u64,
    entries: HashMap<OperationKey, Slot<T>>,
}

/// Collapses concurrent calls for the same key into one underlying operation.
///
/// The registry holds only weak handles: the work is driven by whoever awaits
/// it, and when every joiner has dropped its handle the work is dropped too.
pub struct InFlightRegistry<T> {
    state: Arc<Mutex<RegistryState<T>>>,
}

impl<T> InFlightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                next_generation: 0,
                entries: HashMap::new(),
            })),
        }
    }

    /// Joins the operation already running for `key`, or starts one with
    /// `factory` and registers it before it can be polled.
    ///
    /// The entry is removed when the operation settles (before joiners see
    /// the outcome) or is dropped, so a later call always starts fresh work.
    pub fn join_or_start<F, Fut>(&self, key: OperationKey, factory: F) -> Pending<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut state = lock(&self.state);
        if let Some(outcome) = state.entries.get(&key).and_then(|slot| slot.outcome.upgrade()) {
            client_debug!("joining in-flight {}", key);
            return outcome;
        }

        let generation = state.next_generation;
        state.next_generation += 1;
        let guard = EntryGuard {
            state: Arc::downgrade(&self.state),
            key: key.clone(),
            generation,
        };
        let work = factory();
        let outcome = async move {
            // Dropped when `work` settles, before the output is shared.
            let _guard = guard;
            work.await
        }
        .boxed()
        .shared();

        if let Some(weak) = outcome.downgrade() {
            state.entries.insert(key, Slot { generation, outcome: weak });
        }
        outcome
    }

    /// Detaches every entry whose key starts with `prefix`. The work keeps
    /// running for the callers already holding it, but later calls for those
    /// keys start fresh work. Returns how many entries were detached.
    pub fn forget_prefix(&self, prefix: &str) -> usize {
        let mut state = lock(&self.state);
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.as_str().starts_with(prefix));
        let forgotten = before - state.entries.len();
        if forgotten > 0 {
            client_debug!("detached {} in-flight entries under {}", forgotten, prefix);
        }
        forgotten
    }

    pub fn in_flight(&self, key: &OperationKey) -> bool {
        lock(&self.state).entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for InFlightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(state: &Mutex<RegistryState<T>>) -> MutexGuard<'_, RegistryState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

struct EntryGuard<T> {
    state: Weak<Mutex<RegistryState<T>>>,
    key: OperationKey,
    generation: u64,
}

impl<T> Drop for EntryGuard<T> {
    fn drop(&mut self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut state = lock(&state);
        let ours = state
            .entries
            .get(&self.key)
            .is_some_and(|slot| slot.generation == self.generation);
        if ours {
            state.entries.remove(&self.key);
        }
    }
}
