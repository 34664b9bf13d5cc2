//! Main application state and service coordination
//!
//! `AppState` wires the broker connection, the AMQP-backed chat gateway and
//! game hosts, the store, the lobby machine and the coordinator, and owns the
//! background tasks that keep metrics and result sweeps ticking.

use crate::amqp::{
    AmqpChatGateway, AmqpConfig, AmqpConnection, PublisherConfig, RemoteHostClient, RemoteHostFactory, TriggerConsumer,
};
use crate::config::AppConfig;
use crate::coordinator::{Coordinator, CoordinatorHandle, CoordinatorSettings, Event};
use crate::lobby::{LobbyMachine, LobbyState, MachineSettings};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector};
use crate::rating::EloTeamCalculator;
use crate::results::CachedResultsFeed;
use crate::service::health::{HealthCheck, HealthStatus};
use crate::store::{InMemoryStore, Store};
use crate::worker::{RunnerSettings, WorkerRegistry, WorkerScheduler};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

const METRICS_UPDATE_INTERVAL: Duration = Duration::from_secs(15);

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    started_at: Instant,

    amqp_connection: Arc<AmqpConnection>,
    metrics_collector: Arc<MetricsCollector>,
    store: Arc<dyn Store>,
    scheduler: Arc<WorkerScheduler>,
    results: Arc<CachedResultsFeed>,

    coordinator: CoordinatorHandle,
    coordinator_task: JoinHandle<()>,

    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    trigger_consumer: Mutex<Option<TriggerConsumer>>,
    /// Taken on shutdown; the server holds an `Arc` back to this state
    health_server: Mutex<Option<Arc<HealthServer>>>,

    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Connect to the broker and build every component. The coordinator
    /// starts draining immediately; triggers only flow after `start`.
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {}", config.service.name);

        let amqp_connection = Self::initialize_amqp(&config).await?;
        let metrics_collector = Arc::new(MetricsCollector::new().map_err(|e| ServiceError::Initialization {
            message: format!("Failed to create metrics collector: {}", e),
        })?);
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

        let chat_config = PublisherConfig {
            exchange: config.amqp.chat_exchange.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
        };
        let chat = AmqpChatGateway::new(Self::open_channel(&amqp_connection).await?, chat_config, store.clone())
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to set up chat gateway: {}", e),
            })?
            .with_metrics(metrics_collector.clone());

        let host_client = RemoteHostClient::connect(
            Self::open_channel(&amqp_connection).await?,
            &config.amqp.host_exchange,
            config.worker_command_timeout(),
        )
        .await
        .map_err(|e| ServiceError::Initialization {
            message: format!("Failed to set up game-host client: {}", e),
        })?;

        let registry = WorkerRegistry::new(
            Arc::new(RemoteHostFactory::new(host_client)),
            RunnerSettings::from(&config.orchestration),
        );
        let scheduler = Arc::new(WorkerScheduler::new(store.clone(), registry));
        let rating = Arc::new(EloTeamCalculator::new(32.0, config.league_defaults.initial_rating));

        let machine = Arc::new(
            LobbyMachine::new(
                store.clone(),
                Arc::new(chat),
                scheduler.clone(),
                rating,
                MachineSettings::from(&config.orchestration),
            )
            .with_metrics(metrics_collector.clone()),
        );

        let results = Arc::new(CachedResultsFeed::new());
        let coordinator = Coordinator::new(
            machine,
            results.clone(),
            CoordinatorSettings::from(&config.orchestration),
        )
        .with_metrics(metrics_collector.clone());
        let handle = coordinator.handle();
        let coordinator_task = coordinator.spawn();

        Ok(Self {
            config,
            started_at: Instant::now(),
            amqp_connection,
            metrics_collector,
            store,
            scheduler,
            results,
            coordinator: handle,
            coordinator_task,
            background_tasks: Mutex::new(Vec::new()),
            trigger_consumer: Mutex::new(None),
            health_server: Mutex::new(None),
            is_running: Arc::new(RwLock::new(false)),
        })
    }

    /// Start the health server, trigger consumption and background tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting {}", self.config.service.name);
        *self.is_running.write().await = true;

        self.start_health_server().await;
        self.start_trigger_consumption().await?;
        self.start_background_tasks().await;

        info!("{} started", self.config.service.name);
        Ok(())
    }

    /// Stop intake, let queued events drain, then stop everything else
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown");
        *self.is_running.write().await = false;

        if let Some(consumer) = self.trigger_consumer.lock().await.take() {
            match consumer.stop_consuming().await {
                Ok(()) => info!("Trigger consumption stopped"),
                Err(e) => warn!("Failed to stop trigger consumer: {}", e),
            }
        }

        let drain = self.config.shutdown_timeout();
        if tokio::time::timeout(drain, self.coordinator.wait_idle()).await.is_err() {
            warn!(
                "Coordinator still had {} events after {:?}",
                self.coordinator.pending(),
                drain
            );
        }

        self.stop_background_tasks().await;
        self.coordinator_task.abort();

        if let Some(server) = self.health_server.lock().await.take() {
            server.stop();
        }

        self.scheduler
            .registry()
            .shutdown_all()
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to stop worker runners: {}", e),
            })?;

        info!("Shutdown completed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn coordinator(&self) -> CoordinatorHandle {
        self.coordinator.clone()
    }

    pub fn coordinator_alive(&self) -> bool {
        !self.coordinator_task.is_finished()
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn scheduler(&self) -> Arc<WorkerScheduler> {
        self.scheduler.clone()
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    pub fn amqp_connection(&self) -> Arc<AmqpConnection> {
        self.amqp_connection.clone()
    }

    /// Count non-terminal lobbies by state
    pub async fn lobby_state_counts(&self) -> crate::error::Result<HashMap<LobbyState, usize>> {
        lobby_state_counts(self.store.as_ref()).await
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        let amqp_config = AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::Configuration {
            message: format!("Failed to parse AMQP URL: {}", e),
        })?;
        info!("Connecting to AMQP broker at {}:{}", amqp_config.host, amqp_config.port);

        let connect = AmqpConnection::new(amqp_config);
        let connection = tokio::time::timeout(config.amqp_connection_timeout(), connect)
            .await
            .map_err(|_| ServiceError::AmqpConnection {
                message: format!("Timed out after {:?}", config.amqp_connection_timeout()),
            })?
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to connect to AMQP: {}", e),
            })?;

        Ok(Arc::new(connection))
    }

    async fn open_channel(connection: &AmqpConnection) -> Result<amqprs::channel::Channel, ServiceError> {
        connection.open_channel().await.map_err(|e| ServiceError::AmqpConnection {
            message: e.to_string(),
        })
    }

    async fn start_health_server(self: &Arc<Self>) {
        let config = HealthServerConfig {
            port: self.config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let server = Arc::new(HealthServer::new(config, self.metrics_collector.clone()).with_app_state(self.clone()));

        let task = {
            let server = server.clone();
            tokio::spawn(async move {
                if let Err(e) = server.start().await {
                    error!("Health server failed: {}", e);
                }
            })
        };

        *self.health_server.lock().await = Some(server);
        self.background_tasks.lock().await.push(task);
        info!("Health endpoints on port {}", self.config.service.health_port);
    }

    async fn start_trigger_consumption(&self) -> Result<(), ServiceError> {
        let channel = Self::open_channel(&self.amqp_connection).await?;
        let consumer = TriggerConsumer::new(channel, self.coordinator.clone(), self.results.clone())
            .with_metrics(self.metrics_collector.clone());

        consumer
            .start_consuming(&self.config.amqp.trigger_queue)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming triggers: {}", e),
            })?;

        *self.trigger_consumer.lock().await = Some(consumer);
        Ok(())
    }

    async fn start_background_tasks(self: &Arc<Self>) {
        let sweep_task = {
            let handle = self.coordinator.clone();
            let is_running = self.is_running.clone();
            let mut ticks = IntervalStream::new(tokio::time::interval(self.config.results_poll_interval()));

            tokio::spawn(async move {
                info!("Results sweep task started");
                while ticks.next().await.is_some() {
                    if !*is_running.read().await {
                        break;
                    }
                    if let Err(e) = handle.submit(Event::SweepResults) {
                        warn!("Failed to queue results sweep: {}", e);
                    }
                }
                info!("Results sweep task stopped");
            })
        };

        let metrics_task = {
            let state = Arc::downgrade(self);
            let mut ticks = IntervalStream::new(tokio::time::interval(METRICS_UPDATE_INTERVAL));

            tokio::spawn(async move {
                while ticks.next().await.is_some() {
                    let Some(state) = state.upgrade() else {
                        break;
                    };
                    if !state.is_running().await {
                        break;
                    }
                    state.update_metrics().await;
                }
                debug!("Metrics update task stopped");
            })
        };

        let mut tasks = self.background_tasks.lock().await;
        tasks.push(sweep_task);
        tasks.push(metrics_task);
        info!("{} background tasks running", tasks.len());
    }

    async fn update_metrics(&self) {
        let metrics = &self.metrics_collector;
        match self.lobby_state_counts().await {
            Ok(counts) => metrics.update_lobby_states(&counts),
            Err(e) => warn!("Failed to count lobbies for metrics: {}", e),
        }
        metrics.set_live_workers(self.scheduler.registry().live_count());
        metrics.service().uptime_seconds.set(self.uptime().as_secs() as i64);

        let health = HealthCheck::check(self).await;
        metrics.update_health_status(health.status.gauge());
        for check in &health.checks {
            metrics.update_component_health(&check.name, check.status != HealthStatus::Unhealthy);
        }
        debug!("Metrics updated: {}", health.status);
    }

    async fn stop_background_tasks(&self) {
        let mut tasks = self.background_tasks.lock().await;
        let task_count = tasks.len();
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("Stopped {} background tasks", task_count);
    }
}

pub(crate) async fn lobby_state_counts(store: &dyn Store) -> crate::error::Result<HashMap<LobbyState, usize>> {
    let mut counts = HashMap::new();
    for lobby in store.list_lobbies().await? {
        if !lobby.state.is_terminal() {
            *counts.entry(lobby.state).or_insert(0) += 1;
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Lobby, QueueKind, QueueSlot};

    #[tokio::test]
    async fn test_lobby_state_counts_skip_terminal() {
        let store = InMemoryStore::new();
        let league_id = uuid::Uuid::new_v4();
        let mut waiting = Lobby::new(league_id, QueueSlot::new("draft", QueueKind::Draft));
        waiting.state = LobbyState::WaitingForQueue;
        store.save_lobby(&waiting).await.unwrap();

        let mut done = Lobby::new(league_id, QueueSlot::new("draft", QueueKind::Draft));
        done.state = LobbyState::Completed;
        store.save_lobby(&done).await.unwrap();

        let counts = lobby_state_counts(&store).await.unwrap();
        assert_eq!(counts.get(&LobbyState::WaitingForQueue), Some(&1));
        assert!(!counts.contains_key(&LobbyState::Completed));
    }
}
