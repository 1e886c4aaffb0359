//! Stockdash Common - Shared configuration, errors and logging for stockdash services.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup
//! - Small string helpers used across services

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    CacheBackendKind, CacheConfig, Config, ObservabilityConfig, RankingConfig, SchedulerConfig,
    SourceConfig, SourceKind,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};

