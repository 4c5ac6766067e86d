//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Config struct definitions and file loading
//! - [`defaults`]: serde default value functions
//! - [`validation`]: startup validation
//! - [`env`]: environment variable overrides

mod defaults;
mod env;
mod types;
pub mod validation;

pub use types::{
    ClientBackend, ClientConfig, Config, ConfigError, LogFormat, LoggingConfig, MessagesConfig,
    ServerConfig, SessionsConfig, UploadsConfig,
};
pub use validation::{ValidationError, validate};
