//! Cache lifecycle events

use std::fmt;
use std::sync::Arc;

/// Kind of lifecycle event emitted by a cache facade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEventKind {
    Set,
    Del,
    Clear,
    Refresh,
}

impl fmt::Display for CacheEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEventKind::Set => write!(f, "set"),
            CacheEventKind::Del => write!(f, "del"),
            CacheEventKind::Clear => write!(f, "clear"),
            CacheEventKind::Refresh => write!(f, "refresh"),
        }
    }
}

/// Payload delivered to listeners
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEvent {
    pub kind: CacheEventKind,
    pub key: Option<String>,
    /// Serialized value, when the event carries one
    pub value: Option<String>,
    /// Store failure message, when the operation failed
    pub error: Option<String>,
}

impl CacheEvent {
    pub fn new(kind: CacheEventKind) -> Self {
        Self {
            kind,
            key: None,
            value: None,
            error: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Callback subscribed to a facade's events
pub type CacheListener = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

/// Handle returned by a subscription, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);
