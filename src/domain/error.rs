use std::fmt;

use thiserror::Error;

/// Phase of an async fetch in which a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    /// Failure inside the bound fetch function
    Fetch,
    /// Failure inside the success callback
    Success,
}

impl fmt::Display for FetchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchPhase::Fetch => write!(f, "fetch"),
            FetchPhase::Success => write!(f, "success callback"),
        }
    }
}

/// Core domain errors
///
/// `Clone` so that a single failed computation can be handed to every caller
/// waiting on a shared future.
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Fetch failed for key '{key}' during {phase}: {source}")]
    Fetch {
        key: String,
        phase: FetchPhase,
        #[source]
        source: Box<DomainError>,
    },
}

impl DomainError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn fetch(key: impl Into<String>, phase: FetchPhase, source: DomainError) -> Self {
        Self::Fetch {
            key: key.into(),
            phase,
            source: Box::new(source),
        }
    }

    /// Returns true for the persistent store's own not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
