//! Application configuration

mod app_config;

pub use app_config::{AppConfig, ModelsConfig};
pub use crate::infrastructure::logging::{LogFormat, LoggingConfig};
