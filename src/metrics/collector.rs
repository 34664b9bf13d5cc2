//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the conductor service using
//! Prometheus metrics.

use crate::lobby::LobbyState;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the conductor service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Lobby lifecycle metrics
    lobby_metrics: LobbyMetrics,

    /// Worker pool metrics
    worker_metrics: WorkerMetrics,

    /// Event queue metrics
    coordinator_metrics: CoordinatorMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Lobby lifecycle metrics
#[derive(Clone)]
pub struct LobbyMetrics {
    /// State transitions by source and target state
    pub transitions_total: IntCounterVec,

    /// Lobbies currently in each state
    pub lobbies_by_state: IntGaugeVec,

    /// Ready checks that expired with missing players
    pub ready_check_timeouts_total: IntCounter,

    /// Matches completed, labelled by whether stats were recorded
    pub matches_completed_total: IntCounterVec,
}

/// Worker pool metrics
#[derive(Clone)]
pub struct WorkerMetrics {
    pub assignments_total: IntCounter,
    pub evictions_total: IntCounter,
    pub live_workers: IntGauge,
}

/// Event queue metrics
#[derive(Clone)]
pub struct CoordinatorMetrics {
    /// Events handled by kind and outcome
    pub events_processed_total: IntCounterVec,

    /// Handler duration by event kind
    pub event_duration_seconds: HistogramVec,

    /// Events waiting in the queue
    pub queue_depth: IntGauge,

    /// Time spent realizing a lobby's chat room
    pub room_provisioning_duration: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let lobby_metrics = LobbyMetrics::new(&registry)?;
        let worker_metrics = WorkerMetrics::new(&registry)?;
        let coordinator_metrics = CoordinatorMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            lobby_metrics,
            worker_metrics,
            coordinator_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get lobby metrics
    pub fn lobby(&self) -> &LobbyMetrics {
        &self.lobby_metrics
    }

    /// Get worker metrics
    pub fn worker(&self) -> &WorkerMetrics {
        &self.worker_metrics
    }

    /// Get event queue metrics
    pub fn coordinator(&self) -> &CoordinatorMetrics {
        &self.coordinator_metrics
    }

    /// Record a lobby state transition
    pub fn record_transition(&self, from: LobbyState, to: LobbyState) {
        self.lobby_metrics
            .transitions_total
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
    }

    /// Replace the per-state lobby gauges
    pub fn update_lobby_states(&self, counts: &HashMap<LobbyState, usize>) {
        for state in LobbyState::ALL {
            self.lobby_metrics
                .lobbies_by_state
                .with_label_values(&[state.as_str()])
                .set(counts.get(&state).copied().unwrap_or(0) as i64);
        }
    }

    pub fn record_ready_check_timeout(&self) {
        self.lobby_metrics.ready_check_timeouts_total.inc();
    }

    pub fn record_match_completed(&self, with_stats: bool) {
        let label = if with_stats { "recorded" } else { "missing" };
        self.lobby_metrics
            .matches_completed_total
            .with_label_values(&[label])
            .inc();
    }

    pub fn record_worker_assignment(&self) {
        self.worker_metrics.assignments_total.inc();
    }

    pub fn record_worker_eviction(&self) {
        self.worker_metrics.evictions_total.inc();
    }

    pub fn set_live_workers(&self, count: usize) {
        self.worker_metrics.live_workers.set(count as i64);
    }

    /// Record a handled event
    pub fn record_event(&self, kind: &str, success: bool, duration: Duration) {
        let outcome = if success { "ok" } else { "error" };
        self.coordinator_metrics
            .events_processed_total
            .with_label_values(&[kind, outcome])
            .inc();
        self.coordinator_metrics
            .event_duration_seconds
            .with_label_values(&[kind])
            .observe(duration.as_secs_f64());
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.coordinator_metrics.queue_depth.set(depth as i64);
    }

    pub fn record_room_provisioning(&self, duration: Duration) {
        self.coordinator_metrics
            .room_provisioning_duration
            .observe(duration.as_secs_f64());
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::new("conductor_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new("conductor_amqp_messages_total", "Total AMQP messages processed"),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("conductor_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "conductor_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("conductor_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl LobbyMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let transitions_total = IntCounterVec::new(
            Opts::new("conductor_lobby_transitions_total", "Lobby state transitions"),
            &["from", "to"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let lobbies_by_state = IntGaugeVec::new(
            Opts::new("conductor_lobbies_by_state", "Lobbies currently in each state"),
            &["state"],
        )?;
        registry.register(Box::new(lobbies_by_state.clone()))?;

        let ready_check_timeouts_total = IntCounter::new(
            "conductor_ready_check_timeouts_total",
            "Ready checks that expired with players missing",
        )?;
        registry.register(Box::new(ready_check_timeouts_total.clone()))?;

        let matches_completed_total = IntCounterVec::new(
            Opts::new("conductor_matches_completed_total", "Matches completed"),
            &["stats"],
        )?;
        registry.register(Box::new(matches_completed_total.clone()))?;

        Ok(Self {
            transitions_total,
            lobbies_by_state,
            ready_check_timeouts_total,
            matches_completed_total,
        })
    }
}

impl WorkerMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let assignments_total =
            IntCounter::new("conductor_worker_assignments_total", "Workers bound to lobbies")?;
        registry.register(Box::new(assignments_total.clone()))?;

        let evictions_total = IntCounter::new(
            "conductor_worker_evictions_total",
            "Workers evicted from the live registry",
        )?;
        registry.register(Box::new(evictions_total.clone()))?;

        let live_workers = IntGauge::new("conductor_live_workers", "Workers with a running command queue")?;
        registry.register(Box::new(live_workers.clone()))?;

        Ok(Self {
            assignments_total,
            evictions_total,
            live_workers,
        })
    }
}

impl CoordinatorMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let events_processed_total = IntCounterVec::new(
            Opts::new("conductor_events_processed_total", "Events handled by the coordinator"),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(events_processed_total.clone()))?;

        let event_duration_seconds = HistogramVec::new(
            HistogramOpts::new("conductor_event_duration_seconds", "Event handler duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["kind"],
        )?;
        registry.register(Box::new(event_duration_seconds.clone()))?;

        let queue_depth = IntGauge::new("conductor_queue_depth", "Events waiting in the queue")?;
        registry.register(Box::new(queue_depth.clone()))?;

        let room_provisioning_duration = Histogram::with_opts(
            HistogramOpts::new(
                "conductor_room_provisioning_duration_seconds",
                "Time spent realizing lobby chat rooms",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(room_provisioning_duration.clone()))?;

        Ok(Self {
            events_processed_total,
            event_duration_seconds,
            queue_depth,
            room_provisioning_duration,
        })
    }
}
