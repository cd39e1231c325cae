//! Single-flight result sharing
//!
//! A computation is spawned onto the runtime and wrapped in a shared future;
//! every caller that arrives while it is in flight (or, for [`SingleFlight`],
//! while its result is still valid) awaits a clone of the same future.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

type Computation<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Flight<T, E> {
    generation: u64,
    computation: Computation<T, E>,
}

struct Slot<T, E> {
    next_generation: u64,
    flight: Option<Flight<T, E>>,
}

fn lock<S>(state: &Mutex<S>) -> MutexGuard<'_, S> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawns `work` so it runs to completion whether or not anyone awaits it
fn spawn_shared<T, E, Fut>(work: Fut, on_done: impl FnOnce(bool) + Send + 'static) -> Computation<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let computation = async move {
        let result = work.await;
        on_done(result.is_ok());
        result
    }
    .boxed()
    .shared();

    tokio::spawn(computation.clone());
    computation
}

/// Holds at most one in-flight or unexpired result of one operation
///
/// A failed computation is evicted before its callers observe the error, so the
/// next caller starts over. With a max age, the eviction timer starts when the
/// computation starts, not when it resolves.
pub struct SingleFlight<T, E> {
    slot: Arc<Mutex<Slot<T, E>>>,
    max_age: Option<Duration>,
}

impl<T, E> fmt::Debug for SingleFlight<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight")
            .field("max_age", &self.max_age)
            .field("cached", &lock(&self.slot).flight.is_some())
            .finish()
    }
}

impl<T, E> Default for SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Keeps a successful result until invalidated
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                next_generation: 0,
                flight: None,
            })),
            max_age: None,
        }
    }

    /// Keeps a result for at most `max_age` after its computation started
    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            max_age: Some(max_age),
            ..Self::new()
        }
    }

    /// Returns the shared result, running `generator` only if none is held
    pub async fn get<F, Fut>(&self, generator: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let computation = {
            let mut slot = lock(&self.slot);

            match &slot.flight {
                Some(flight) => flight.computation.clone(),
                None => {
                    slot.next_generation += 1;
                    let generation = slot.next_generation;
                    let computation = self.launch(generation, generator());

                    slot.flight = Some(Flight {
                        generation,
                        computation: computation.clone(),
                    });
                    computation
                }
            }
        };

        computation.await
    }

    /// Drops the held result; the next caller recomputes
    pub fn invalidate(&self) {
        lock(&self.slot).flight = None;
    }

    /// True while a result is in flight or held
    pub fn is_cached(&self) -> bool {
        lock(&self.slot).flight.is_some()
    }

    fn launch<Fut>(&self, generation: u64, work: Fut) -> Computation<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let slot = Arc::downgrade(&self.slot);
        let computation = spawn_shared(work, move |succeeded| {
            if !succeeded {
                debug!(generation, "Single-flight computation failed, evicting");
                Self::evict(&slot, generation);
            }
        });

        if let Some(max_age) = self.max_age {
            let slot = Arc::downgrade(&self.slot);

            tokio::spawn(async move {
                tokio::time::sleep(max_age).await;
                Self::evict(&slot, generation);
            });
        }

        computation
    }

    fn evict(slot: &Weak<Mutex<Slot<T, E>>>, generation: u64) {
        if let Some(slot) = slot.upgrade() {
            let mut slot = lock(&slot);

            if slot
                .flight
                .as_ref()
                .is_some_and(|flight| flight.generation == generation)
            {
                slot.flight = None;
            }
        }
    }
}

struct Flights<T, E> {
    next_generation: u64,
    by_key: HashMap<String, Flight<T, E>>,
}

/// Collapses concurrent computations per key
///
/// Unlike [`SingleFlight`] nothing is kept once a computation resolves; the
/// result store is somebody else's job.
pub struct KeyedSingleFlight<T, E> {
    flights: Arc<Mutex<Flights<T, E>>>,
}

impl<T, E> fmt::Debug for KeyedSingleFlight<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedSingleFlight")
            .field("in_flight", &lock(&self.flights).by_key.len())
            .finish()
    }
}

impl<T, E> Default for KeyedSingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> KeyedSingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(Flights {
                next_generation: 0,
                by_key: HashMap::new(),
            })),
        }
    }

    /// Joins the in-flight computation for `key`, or starts one
    pub async fn run<F, Fut>(&self, key: &str, generator: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let computation = {
            let mut flights = lock(&self.flights);

            match flights.by_key.get(key) {
                Some(flight) => flight.computation.clone(),
                None => {
                    flights.next_generation += 1;
                    let generation = flights.next_generation;

                    let handle = Arc::downgrade(&self.flights);
                    let owned_key = key.to_string();
                    let computation = spawn_shared(generator(), move |_| {
                        Self::finish(&handle, &owned_key, generation);
                    });

                    flights.by_key.insert(
                        key.to_string(),
                        Flight {
                            generation,
                            computation: computation.clone(),
                        },
                    );
                    computation
                }
            }
        };

        computation.await
    }

    /// True while a computation for `key` is running
    pub fn in_flight(&self, key: &str) -> bool {
        lock(&self.flights).by_key.contains_key(key)
    }

    fn finish(flights: &Weak<Mutex<Flights<T, E>>>, key: &str, generation: u64) {
        if let Some(flights) = flights.upgrade() {
            let mut flights = lock(&flights);

            if flights
                .by_key
                .get(key)
                .is_some_and(|flight| flight.generation == generation)
            {
                flights.by_key.remove(key);
            }
        }
    }
}
