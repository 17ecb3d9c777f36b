//! Single-flight: collapse concurrent work for one key into one execution
//!
//! The map only holds weak handles. When every caller awaiting a flight is
//! dropped (batch cancelled), the flight dies with them and the next caller
//! starts a fresh one. A finished flight removes its own slot, guarded by a
//! generation number so it never removes a newer flight for the same key.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Flight<T> = Shared<BoxFuture<'static, T>>;
type WeakFlight<T> = WeakShared<BoxFuture<'static, T>>;

pub struct SingleFlight<K, T> {
    flights: Arc<DashMap<K, (u64, Option<WeakFlight<T>>)>>,
    generation: AtomicU64,
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Run `work` for `key` unless a flight is already up, in which case join it.
    ///
    /// Returns the shared output and whether this caller joined an existing flight.
    /// `work` is only invoked by the caller that starts the flight.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> (T, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (flight, joined) = match self.flights.entry(key.clone()) {
            Entry::Occupied(mut slot) => match slot.get().1.as_ref().and_then(WeakShared::upgrade) {
                Some(flight) => (flight, true),
                None => {
                    let (generation, flight, weak) = self.start(key, work);
                    slot.insert((generation, weak));
                    (flight, false)
                }
            },
            Entry::Vacant(slot) => {
                let (generation, flight, weak) = self.start(key, work);
                slot.insert((generation, weak));
                (flight, false)
            }
        };

        (flight.await, joined)
    }

    /// Keys with a flight slot, live or stale
    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }

    fn start<F, Fut>(&self, key: K, work: F) -> (u64, Flight<T>, Option<WeakFlight<T>>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let flights = Arc::clone(&self.flights);
        let work = work();

        let flight = async move {
            let output = work.await;
            flights.remove_if(&key, |_, (current, _)| *current == generation);
            output
        }
        .boxed()
        .shared();

        let weak = flight.downgrade();
        (generation, flight, weak)
    }
}
