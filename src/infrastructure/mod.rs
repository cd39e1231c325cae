//! Infrastructure layer - cache, model store and observability implementations

pub mod cache;
pub mod latency;
pub mod logging;
pub mod metrics;
pub mod model;
