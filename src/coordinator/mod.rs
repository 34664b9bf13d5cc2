//! Orchestration coordinator
//!
//! Every state-mutating input (player commands, worker signals, timer
//! firings, feed sweeps, operator overrides) is an `Event` on one unbounded
//! FIFO queue. A single task drains the queue and runs each handler to
//! completion before taking the next, so lobby and queue records never see
//! concurrent writers. Handler failures are logged and the loop moves on.

pub mod event;
pub mod locks;
pub(crate) mod operator;
pub(crate) mod players;
pub mod timers;

use crate::config::OrchestrationSettings;
use crate::error::{OrchestratorError, Result};
use crate::lobby::{Effect, LobbyMachine, LobbyState};
use crate::metrics::MetricsCollector;
use crate::results::MatchResultsFeed;
use crate::worker::WorkerSignal;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// Re-export commonly used types
pub use event::{Event, OperatorCommand, OperatorReply, PlayerCommand, TimerKind};
pub use locks::KeyedLock;
pub use timers::LobbyTimers;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Delay before a lobby without a worker tries again
    pub worker_wait_retry: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            worker_wait_retry: Duration::from_secs(30),
        }
    }
}

impl From<&OrchestrationSettings> for CoordinatorSettings {
    fn from(settings: &OrchestrationSettings) -> Self {
        Self {
            worker_wait_retry: settings.worker_wait_retry(),
        }
    }
}

/// Cloneable submitter for the coordinator queue
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::UnboundedSender<Event>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl std::fmt::Debug for CoordinatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorHandle")
            .field("pending", &self.pending())
            .finish()
    }
}

impl CoordinatorHandle {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = Self {
            sender,
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        };
        (handle, receiver)
    }

    /// Enqueue an event behind everything already submitted
    pub fn submit(&self, event: Event) -> Result<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.sender.send(event).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            OrchestratorError::InternalError {
                message: "Coordinator queue is closed".to_string(),
            }
            .into()
        })
    }

    /// Events submitted but not yet fully handled
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until the queue is drained. Armed timers do not count as pending.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Submit an operator command and wait for its reply
    pub async fn operator(&self, command: OperatorCommand) -> Result<OperatorReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(Event::Operator {
            command,
            reply: Some(reply_tx),
        })?;
        reply_rx.await.map_err(|_| OrchestratorError::InternalError {
            message: "Coordinator dropped the operator reply".to_string(),
        })?
    }

    fn finished(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct Coordinator {
    machine: Arc<LobbyMachine>,
    results: Arc<dyn MatchResultsFeed>,
    receiver: mpsc::UnboundedReceiver<Event>,
    handle: CoordinatorHandle,
    timers: LobbyTimers,
    settings: CoordinatorSettings,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Coordinator {
    pub fn new(machine: Arc<LobbyMachine>, results: Arc<dyn MatchResultsFeed>, settings: CoordinatorSettings) -> Self {
        let (handle, receiver) = CoordinatorHandle::channel();
        Self {
            machine,
            results,
            receiver,
            handle,
            timers: LobbyTimers::new(),
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    pub fn machine(&self) -> Arc<LobbyMachine> {
        self.machine.clone()
    }

    /// Start draining the queue on a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drain events until every handle is dropped
    pub async fn run(mut self) {
        info!("Coordinator started");
        while let Some(event) = self.receiver.recv().await {
            self.process(event).await;
        }
        self.timers.cancel_all();
        info!("Coordinator stopped");
    }

    async fn process(&mut self, event: Event) {
        let kind = event.kind();
        let start = Instant::now();
        debug!("Processing {} event", kind);

        let outcome = self.dispatch(event).await;
        if let Err(e) = &outcome {
            error!("Failed to handle {} event: {:#}", kind, e);
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_event(kind, outcome.is_ok(), start.elapsed());
        }
        self.handle.finished();
        if let Some(metrics) = &self.metrics {
            metrics.set_queue_depth(self.handle.pending());
        }
    }

    async fn dispatch(&mut self, event: Event) -> Result<()> {
        let machine = self.machine.clone();
        let effects = match event {
            Event::RunLobby(lobby_id) => machine.run(lobby_id).await?,
            Event::RunSlot { league_id, slot_id } => players::open_lobby_runs(&machine, league_id, &slot_id).await?,
            Event::Player(command) => players::handle_player_command(&machine, command).await?,
            Event::Worker(signal) => self.handle_worker_signal(signal).await?,
            Event::TimerFired {
                lobby_id,
                timer,
                generation,
            } => {
                if !self.timers.fired(lobby_id, timer, generation) {
                    debug!("Ignoring stale {:?} timer for lobby {}", timer, lobby_id);
                    return Ok(());
                }
                match timer {
                    TimerKind::ReadyCheck => machine.expire_ready_check(lobby_id).await?,
                    TimerKind::WorkerWait => machine.run(lobby_id).await?,
                }
            }
            Event::SweepResults => self.sweep_results().await?,
            Event::ChatRelay { lobby_id, author, text } => {
                machine.relay_to_game(lobby_id, &author, &text).await?;
                Vec::new()
            }
            Event::MemberDeparted { player_id } => machine.remove_member(&player_id).await?,
            Event::Operator { command, reply } => {
                match operator::handle_operator_command(&machine, command).await {
                    Ok((answer, effects)) => {
                        self.apply(effects)?;
                        if let Some(reply) = reply {
                            let _ = reply.send(Ok(answer));
                        }
                        return Ok(());
                    }
                    Err(e) => {
                        let failure = anyhow::anyhow!("Operator command failed: {:#}", e);
                        if let Some(reply) = reply {
                            let _ = reply.send(Err(e));
                        }
                        return Err(failure);
                    }
                }
            }
        };
        self.apply(effects)
    }

    async fn handle_worker_signal(&self, signal: WorkerSignal) -> Result<Vec<Effect>> {
        let machine = &self.machine;
        match signal {
            WorkerSignal::Ready { worker_id } => {
                machine.scheduler().signal_ready(&worker_id, true)?;
                Ok(Vec::new())
            }
            WorkerSignal::Disconnected { worker_id } => {
                if machine.scheduler().signal_ready(&worker_id, false)? {
                    warn!("Worker {} disconnected, holding its command queue", worker_id);
                }
                Ok(Vec::new())
            }
            WorkerSignal::LobbyMembersChanged { worker_id } => machine.lobby_members_changed(&worker_id).await,
            WorkerSignal::MatchStarted { worker_id, match_id } => machine.mark_match_started(&worker_id, match_id).await,
            WorkerSignal::MatchEnded {
                worker_id,
                winning_side,
            } => {
                let effects = machine.mark_match_ended(&worker_id, winning_side).await?;
                self.handle.submit(Event::SweepResults)?;
                Ok(effects)
            }
            WorkerSignal::Chat {
                worker_id,
                author,
                text,
            } => {
                machine.relay_from_game(&worker_id, &author, &text).await?;
                Ok(Vec::new())
            }
            WorkerSignal::Fatal { worker_id, reason } => machine.handle_worker_fatal(&worker_id, &reason).await,
        }
    }

    /// Poll the feed for every running or finished match
    async fn sweep_results(&self) -> Result<Vec<Effect>> {
        let lobbies = self
            .machine
            .store()
            .lobbies_in_states(&[LobbyState::MatchInProgress, LobbyState::MatchEnded])
            .await?;

        let mut effects = Vec::new();
        for lobby in lobbies {
            let Some(match_id) = lobby.match_id else {
                continue;
            };
            let status = match self.results.fetch(match_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!("Results feed failed for match {}: {}", match_id, e);
                    continue;
                }
            };
            match self.machine.record_results(lobby.id, status).await {
                Ok(produced) => effects.extend(produced),
                Err(e) => warn!("Could not record results for lobby {}: {}", lobby.id, e),
            }
        }
        Ok(effects)
    }

    fn apply(&mut self, effects: Vec<Effect>) -> Result<()> {
        for effect in effects {
            match effect {
                Effect::RunLobby(lobby_id) => self.handle.submit(Event::RunLobby(lobby_id))?,
                Effect::StartReadyCheckTimer { lobby_id, deadline } => {
                    let delay = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    self.timers.start(lobby_id, TimerKind::ReadyCheck, delay, &self.handle);
                }
                Effect::CancelReadyCheckTimer(lobby_id) => {
                    self.timers.cancel(lobby_id, TimerKind::ReadyCheck);
                }
                Effect::AwaitWorker(lobby_id) => {
                    self.timers
                        .start(lobby_id, TimerKind::WorkerWait, self.settings.worker_wait_retry, &self.handle);
                }
                Effect::CancelWorkerWait(lobby_id) => {
                    self.timers.cancel(lobby_id, TimerKind::WorkerWait);
                }
                Effect::WorkerAvailable(worker_id) => {
                    let waiting = self.timers.take_worker_waiters();
                    if !waiting.is_empty() {
                        debug!("Worker {} available, waking {} lobbies", worker_id, waiting.len());
                    }
                    for lobby_id in waiting {
                        self.handle.submit(Event::RunLobby(lobby_id))?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::MockChatGateway;
    use crate::lobby::MachineSettings;
    use crate::rating::EloTeamCalculator;
    use crate::results::CachedResultsFeed;
    use crate::store::InMemoryStore;
    use crate::types::WorkerRecord;
    use crate::worker::{MockHostFactory, RunnerSettings, WorkerRegistry, WorkerScheduler};

    fn coordinator() -> Coordinator {
        let store = Arc::new(InMemoryStore::new());
        let registry = WorkerRegistry::new(Arc::new(MockHostFactory::new()), RunnerSettings::default());
        let scheduler = Arc::new(WorkerScheduler::new(store.clone(), registry));
        let machine = LobbyMachine::new(
            store,
            Arc::new(MockChatGateway::new()),
            scheduler,
            Arc::new(EloTeamCalculator::new(32.0, 1500.0)),
            MachineSettings::default(),
        );
        Coordinator::new(
            Arc::new(machine),
            Arc::new(CachedResultsFeed::new()),
            CoordinatorSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_operator_reply_round_trip() {
        let coordinator = coordinator();
        let handle = coordinator.handle();
        let task = coordinator.spawn();

        handle
            .operator(OperatorCommand::AddWorker {
                worker: WorkerRecord::new("worker-1"),
            })
            .await
            .unwrap();
        let OperatorReply::Workers(workers) = handle.operator(OperatorCommand::ListWorkers).await.unwrap() else {
            panic!("expected a worker list");
        };
        assert_eq!(workers.len(), 1);

        // Duplicate registration is reported back instead of stopping the loop
        assert!(handle
            .operator(OperatorCommand::AddWorker {
                worker: WorkerRecord::new("worker-1"),
            })
            .await
            .is_err());
        handle.wait_idle().await;
        assert_eq!(handle.pending(), 0);

        task.abort();
    }

    #[tokio::test]
    async fn test_wait_idle_resolves_once_queue_drains() {
        let coordinator = coordinator();
        let handle = coordinator.handle();
        handle.submit(Event::SweepResults).unwrap();

        let mut idle = tokio_test::task::spawn(handle.wait_idle());
        tokio_test::assert_pending!(idle.poll());

        let task = coordinator.spawn();
        handle.wait_idle().await;
        assert!(idle.is_woken());
        tokio_test::assert_ready!(idle.poll());

        task.abort();
    }

    #[tokio::test]
    async fn test_failed_event_does_not_halt_queue() {
        let coordinator = coordinator();
        let handle = coordinator.handle();
        let task = coordinator.spawn();

        handle.submit(Event::RunLobby(uuid::Uuid::new_v4())).unwrap();
        handle
            .submit(Event::MemberDeparted {
                player_id: "nobody".to_string(),
            })
            .unwrap();
        handle.wait_idle().await;

        let reply = handle.operator(OperatorCommand::ListWorkers).await.unwrap();
        assert!(matches!(reply, OperatorReply::Workers(workers) if workers.is_empty()));

        task.abort();
    }
}
