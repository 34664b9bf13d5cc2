//! Service layer for the conductor
//!
//! Application state, component wiring and background task management.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceError};
pub use health::{ComponentCheck, HealthCheck, HealthStatus, ServiceStats};
