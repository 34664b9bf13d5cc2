//! Configuration management for the orchestrator
//!
//! This module handles configuration loading from environment variables and
//! TOML files, validation, and default values for leagues.

pub mod app;
pub mod league;

// Re-export commonly used types
pub use app::{validate_config, AmqpSettings, AppConfig, OrchestrationSettings, ServiceSettings};
pub use league::LeagueDefaults;
