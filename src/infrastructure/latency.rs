//! Latency tracking for repeated operations

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::domain::cache::TimingStats;

type StartCallback = Arc<dyn Fn(&str) + Send + Sync>;
type EndCallback = Arc<dyn Fn(&str, Duration) + Send + Sync>;

/// Records run count and durations of an operation
///
/// `on_start` and `on_end` receive the display name of each run: an explicit
/// name when given, otherwise the name of the function being run, otherwise
/// the tracker's own name.
pub struct LatencyTracker {
    name: String,
    stats: Mutex<TimingStats>,
    on_start: Option<StartCallback>,
    on_end: Option<EndCallback>,
}

impl fmt::Debug for LatencyTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyTracker")
            .field("name", &self.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl LatencyTracker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stats: Mutex::new(TimingStats::default()),
            on_start: None,
            on_end: None,
        }
    }

    pub fn with_on_start<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(callback));
        self
    }

    pub fn with_on_end<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, Duration) + Send + Sync + 'static,
    {
        self.on_end = Some(Arc::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> TimingStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs an operation under the function's own name, if it has one
    pub async fn run<F, Fut>(&self, operation: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let name = function_name::<F>().unwrap_or(&self.name);
        self.measure(name, operation()).await
    }

    /// Runs an operation under an explicit name
    pub async fn run_as<F, Fut>(&self, name: &str, operation: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.measure(name, operation()).await
    }

    /// Awaits a future, reporting it under `name`
    pub async fn measure<Fut>(&self, name: &str, future: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        if let Some(callback) = &self.on_start {
            callback(name);
        }

        let started = Instant::now();
        let output = future.await;
        let elapsed = started.elapsed();

        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(elapsed);
        trace!(tracker = %self.name, run = name, ?elapsed, "Operation finished");

        if let Some(callback) = &self.on_end {
            callback(name, elapsed);
        }

        output
    }
}

/// A tracker bound to one operation
pub struct Tracked<F> {
    tracker: LatencyTracker,
    operation: F,
}

impl<F> fmt::Debug for Tracked<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("tracker", &self.tracker)
            .finish()
    }
}

impl<F, Fut> Tracked<F>
where
    F: Fn() -> Fut,
    Fut: Future,
{
    pub fn new(tracker: LatencyTracker, operation: F) -> Self {
        Self { tracker, operation }
    }

    pub fn tracker(&self) -> &LatencyTracker {
        &self.tracker
    }

    /// Runs the bound operation under the tracker's name
    pub async fn call(&self) -> Fut::Output {
        self.tracker
            .measure(&self.tracker.name, (self.operation)())
            .await
    }

    /// Runs a replacement operation in place of the bound one
    pub async fn call_with<G, GFut>(&self, name: Option<&str>, operation: G) -> GFut::Output
    where
        G: FnOnce() -> GFut,
        GFut: Future,
    {
        match name {
            Some(name) => self.tracker.run_as(name, operation).await,
            None => self.tracker.run(operation).await,
        }
    }
}

/// Item name of a function type; closures have none
fn function_name<F>() -> Option<&'static str> {
    let full = type_name::<F>();

    if full.contains("{{closure}}") {
        return None;
    }

    let path = full.split('<').next().unwrap_or(full);
    path.rsplit("::").next().filter(|name| !name.is_empty())
}
