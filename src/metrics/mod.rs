//! Metrics and monitoring for the conductor service
//!
//! Prometheus collectors plus the HTTP server exposing health probes and
//! the scrape endpoint.

pub mod collector;
pub mod health;

pub use collector::{
    CoordinatorMetrics, LobbyMetrics, MetricsCollector, MetricsTimer, ServiceMetrics, WorkerMetrics,
};
pub use health::{HealthServer, HealthServerConfig};
