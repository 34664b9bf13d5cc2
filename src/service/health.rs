//! Health checks
//!
//! Component probes and the statistics snapshot used by the health server
//! and the periodic status log.

use crate::service::app::AppState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported as `conductor_health_status`
    pub fn gauge(self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Set when the component is not healthy
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl ComponentCheck {
    fn new(name: &str, started: Instant, outcome: std::result::Result<(), (HealthStatus, String)>) -> Self {
        let (status, message) = match outcome {
            Ok(()) => (HealthStatus::Healthy, None),
            Err((status, message)) => (status, Some(message)),
        };
        Self {
            name: name.to_string(),
            status,
            message,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Non-terminal lobbies keyed by state name
    pub lobbies_by_state: BTreeMap<String, usize>,
    pub live_workers: usize,
    /// Events queued or running in the coordinator
    pub pending_events: usize,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Probe every component and gather statistics
    pub async fn check(app_state: &AppState) -> Self {
        let checks = vec![
            Self::check_service_running(app_state).await,
            Self::check_coordinator(app_state),
            Self::check_amqp(app_state),
            Self::check_store(app_state).await,
        ];
        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |overall, check| overall.worst(check.status));

        HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats: Self::gather_service_stats(app_state).await,
        }
    }

    /// The service is up and the coordinator loop is still draining events
    pub async fn liveness_check(app_state: &AppState) -> HealthStatus {
        if app_state.is_running().await && app_state.coordinator_alive() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Ready when live; degraded while the broker connection is down
    pub async fn readiness_check(app_state: &AppState) -> HealthStatus {
        match Self::liveness_check(app_state).await {
            HealthStatus::Healthy => Self::check_amqp(app_state).status,
            other => other,
        }
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let started = Instant::now();
        let outcome = if app_state.is_running().await {
            Ok(())
        } else {
            Err((HealthStatus::Unhealthy, "Service is not running".to_string()))
        };
        ComponentCheck::new("service_running", started, outcome)
    }

    fn check_coordinator(app_state: &AppState) -> ComponentCheck {
        let started = Instant::now();
        let outcome = if app_state.coordinator_alive() {
            Ok(())
        } else {
            Err((HealthStatus::Unhealthy, "Coordinator loop has exited".to_string()))
        };
        ComponentCheck::new("coordinator", started, outcome)
    }

    fn check_amqp(app_state: &AppState) -> ComponentCheck {
        let started = Instant::now();
        let outcome = if app_state.amqp_connection().is_alive() {
            Ok(())
        } else {
            Err((HealthStatus::Degraded, "AMQP connection is closed".to_string()))
        };
        ComponentCheck::new("amqp_connection", started, outcome)
    }

    async fn check_store(app_state: &AppState) -> ComponentCheck {
        let started = Instant::now();
        let outcome = app_state
            .store()
            .list_lobbies()
            .await
            .map(|_| ())
            .map_err(|e| (HealthStatus::Unhealthy, format!("Store query failed: {}", e)));
        ComponentCheck::new("store", started, outcome)
    }

    async fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let lobbies_by_state = match app_state.lobby_state_counts().await {
            Ok(counts) => counts
                .into_iter()
                .map(|(state, count)| (state.to_string(), count))
                .collect(),
            Err(e) => {
                debug!("Failed to count lobbies for health check: {}", e);
                BTreeMap::new()
            }
        };

        ServiceStats {
            lobbies_by_state,
            live_workers: app_state.scheduler().registry().live_count(),
            pending_events: app_state.coordinator().pending(),
            uptime_seconds: app_state.uptime().as_secs(),
        }
    }
}
