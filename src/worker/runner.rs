//! Per-worker command queue
//!
//! Each live worker owns a task that drains a bounded mpsc queue of host
//! commands one at a time. Before running a command the task waits until the
//! host connection is ready, reconnecting with exponential backoff, so at most
//! one hosting-service operation is ever in flight per worker.

use crate::config::OrchestrationSettings;
use crate::error::{OrchestratorError, Result};
use crate::types::{AccountId, ExternalLobbyId, WorkerId};
use crate::worker::host::{GameHost, HostLobbyOptions, TeamSnapshot};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Tuning for worker command runners
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub queue_capacity: usize,
    /// Bound on queueing plus execution of a single command
    pub command_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            command_timeout: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30000),
        }
    }
}

impl From<&OrchestrationSettings> for RunnerSettings {
    fn from(settings: &OrchestrationSettings) -> Self {
        Self {
            queue_capacity: settings.worker_command_queue_capacity,
            command_timeout: settings.worker_command_timeout(),
            initial_backoff: Duration::from_millis(settings.reconnect_initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.reconnect_max_backoff_ms),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

/// Commands accepted by a worker runner
pub(crate) enum HostCommand {
    CreateLobby {
        options: HostLobbyOptions,
        reply: Reply<ExternalLobbyId>,
    },
    JoinLobby {
        lobby_id: ExternalLobbyId,
        password: String,
        reply: Reply<()>,
    },
    Invite {
        account_id: AccountId,
        reply: Reply<()>,
    },
    TeamSnapshot {
        reply: Reply<TeamSnapshot>,
    },
    Launch {
        reply: Reply<()>,
    },
    Chat {
        text: String,
        reply: Reply<()>,
    },
    LeaveLobby {
        reply: Reply<()>,
    },
    AbandonMatch {
        reply: Reply<()>,
    },
    DestroyLobby {
        reply: Reply<()>,
    },
    Shutdown,
}

/// Cheap, cloneable front of a worker runner
#[derive(Clone)]
pub struct WorkerHandle {
    worker_id: WorkerId,
    sender: mpsc::Sender<HostCommand>,
    ready: Arc<watch::Sender<bool>>,
    current_lobby: Arc<RwLock<Option<ExternalLobbyId>>>,
    command_timeout: Duration,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("worker_id", &self.worker_id)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl WorkerHandle {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Open or close the command queue gate
    pub fn set_ready(&self, ready: bool) {
        self.ready.send_replace(ready);
    }

    /// External lobby the worker currently hosts, if any
    pub fn current_lobby(&self) -> Option<ExternalLobbyId> {
        self.current_lobby.read().ok().and_then(|lobby| *lobby)
    }

    fn unavailable(&self) -> anyhow::Error {
        OrchestratorError::WorkerUnavailable {
            worker_id: self.worker_id.clone(),
        }
        .into()
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> HostCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = build(reply_tx);
        let exchange = async {
            self.sender
                .send(command)
                .await
                .map_err(|_| self.unavailable())?;
            reply_rx.await.map_err(|_| self.unavailable())?
        };

        match tokio::time::timeout(self.command_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::WorkerProvisioningFailure {
                worker_id: self.worker_id.clone(),
                reason: format!("command timed out after {:?}", self.command_timeout),
            }
            .into()),
        }
    }

    pub async fn create_lobby(&self, options: HostLobbyOptions) -> Result<ExternalLobbyId> {
        self.request(|reply| HostCommand::CreateLobby { options, reply })
            .await
    }

    pub async fn join_lobby(&self, lobby_id: ExternalLobbyId, password: &str) -> Result<()> {
        let password = password.to_string();
        self.request(|reply| HostCommand::JoinLobby {
            lobby_id,
            password,
            reply,
        })
        .await
    }

    pub async fn invite(&self, account_id: AccountId) -> Result<()> {
        self.request(|reply| HostCommand::Invite { account_id, reply })
            .await
    }

    pub async fn team_snapshot(&self) -> Result<TeamSnapshot> {
        self.request(|reply| HostCommand::TeamSnapshot { reply }).await
    }

    pub async fn launch(&self) -> Result<()> {
        self.request(|reply| HostCommand::Launch { reply }).await
    }

    pub async fn send_chat(&self, text: &str) -> Result<()> {
        let text = text.to_string();
        self.request(|reply| HostCommand::Chat { text, reply }).await
    }

    pub async fn leave_lobby(&self) -> Result<()> {
        self.request(|reply| HostCommand::LeaveLobby { reply }).await
    }

    pub async fn abandon_match(&self) -> Result<()> {
        self.request(|reply| HostCommand::AbandonMatch { reply }).await
    }

    pub async fn destroy_lobby(&self) -> Result<()> {
        self.request(|reply| HostCommand::DestroyLobby { reply }).await
    }

    /// Ask the runner to disconnect and stop; false if the queue is full or closed
    pub(crate) fn request_shutdown(&self) -> bool {
        self.sender.try_send(HostCommand::Shutdown).is_ok()
    }
}

struct WorkerRunner {
    worker_id: WorkerId,
    host: Arc<dyn GameHost>,
    receiver: mpsc::Receiver<HostCommand>,
    ready_tx: Arc<watch::Sender<bool>>,
    ready_rx: watch::Receiver<bool>,
    current_lobby: Arc<RwLock<Option<ExternalLobbyId>>>,
    settings: RunnerSettings,
}

impl WorkerRunner {
    async fn run(mut self) {
        info!("Worker runner {} started", self.worker_id);

        while let Some(command) = self.receiver.recv().await {
            if matches!(command, HostCommand::Shutdown) {
                if let Err(e) = self.host.disconnect().await {
                    warn!("Worker {} failed to disconnect cleanly: {}", self.worker_id, e);
                }
                break;
            }

            self.wait_until_ready().await;
            self.execute(command).await;
        }

        self.ready_tx.send_replace(false);
        info!("Worker runner {} stopped", self.worker_id);
    }

    /// Block the queue until the host reports ready, reconnecting with backoff
    async fn wait_until_ready(&mut self) {
        let mut delay = self.settings.initial_backoff;
        let mut attempt = 0u32;

        loop {
            if *self.ready_rx.borrow_and_update() {
                return;
            }

            attempt += 1;
            match self.host.connect().await {
                Ok(()) => {
                    info!("Worker {} connected after {} attempt(s)", self.worker_id, attempt);
                    self.ready_tx.send_replace(true);
                    return;
                }
                Err(e) => {
                    warn!(
                        "Worker {} connect attempt {} failed: {}, retrying in {:?}",
                        self.worker_id, attempt, e, delay
                    );
                    tokio::select! {
                        changed = self.ready_rx.changed() => {
                            if changed.is_err() {
                                sleep(delay).await;
                            }
                        }
                        _ = sleep(delay) => {}
                    }
                    delay = Duration::from_millis(
                        (delay.as_millis() as u64 * 2).min(self.settings.max_backoff.as_millis() as u64),
                    );
                }
            }
        }
    }

    fn set_current_lobby(&self, lobby: Option<ExternalLobbyId>) {
        if let Ok(mut current) = self.current_lobby.write() {
            *current = lobby;
        }
    }

    async fn execute(&self, command: HostCommand) {
        match command {
            HostCommand::CreateLobby { options, reply } => {
                debug!("Worker {} creating lobby {}", self.worker_id, options.name);
                let result = self.host.create_lobby(&options).await;
                if let Ok(lobby_id) = &result {
                    self.set_current_lobby(Some(*lobby_id));
                }
                let _ = reply.send(result);
            }
            HostCommand::JoinLobby {
                lobby_id,
                password,
                reply,
            } => {
                debug!("Worker {} joining lobby {}", self.worker_id, lobby_id);
                let result = self.host.join_lobby(lobby_id, &password).await;
                if result.is_ok() {
                    self.set_current_lobby(Some(lobby_id));
                }
                let _ = reply.send(result);
            }
            HostCommand::Invite { account_id, reply } => {
                let _ = reply.send(self.host.invite(account_id).await);
            }
            HostCommand::TeamSnapshot { reply } => {
                let _ = reply.send(self.host.team_snapshot().await);
            }
            HostCommand::Launch { reply } => {
                info!("Worker {} launching match", self.worker_id);
                let _ = reply.send(self.host.launch().await);
            }
            HostCommand::Chat { text, reply } => {
                let _ = reply.send(self.host.send_chat(&text).await);
            }
            HostCommand::LeaveLobby { reply } => {
                let result = self.host.leave_lobby().await;
                if result.is_ok() {
                    self.set_current_lobby(None);
                }
                let _ = reply.send(result);
            }
            HostCommand::AbandonMatch { reply } => {
                let result = self.host.abandon_match().await;
                if result.is_ok() {
                    self.set_current_lobby(None);
                }
                let _ = reply.send(result);
            }
            HostCommand::DestroyLobby { reply } => {
                let result = self.host.destroy_lobby().await;
                if result.is_ok() {
                    self.set_current_lobby(None);
                }
                let _ = reply.send(result);
            }
            HostCommand::Shutdown => {}
        }
    }
}

/// Spawn a runner task for a worker and return its handle
pub(crate) fn spawn_worker(
    worker_id: WorkerId,
    host: Arc<dyn GameHost>,
    settings: RunnerSettings,
) -> (WorkerHandle, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel(settings.queue_capacity);
    let (ready_tx, ready_rx) = watch::channel(false);
    let ready_tx = Arc::new(ready_tx);
    let current_lobby = Arc::new(RwLock::new(None));

    let handle = WorkerHandle {
        worker_id: worker_id.clone(),
        sender,
        ready: ready_tx.clone(),
        current_lobby: current_lobby.clone(),
        command_timeout: settings.command_timeout,
    };

    let runner = WorkerRunner {
        worker_id,
        host,
        receiver,
        ready_tx,
        ready_rx,
        current_lobby,
        settings,
    };

    (handle, tokio::spawn(runner.run()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GameMode, GameSide};
    use crate::worker::mock::MockGameHost;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn options() -> HostLobbyOptions {
        HostLobbyOptions {
            league_id: Uuid::new_v4(),
            name: "inhouse-1".to_string(),
            password: "secret".to_string(),
            game_mode: GameMode::CaptainsMode,
            ticket: None,
        }
    }

    fn fast_settings() -> RunnerSettings {
        RunnerSettings {
            queue_capacity: 8,
            command_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        }
    }

    #[tokio::test]
    async fn test_commands_run_one_at_a_time() {
        let host = Arc::new(MockGameHost::new());
        host.set_command_delay(Duration::from_millis(20));
        let (handle, _task) = spawn_worker("w1".to_string(), host.clone(), fast_settings());

        let lobby_id = handle.create_lobby(options()).await.unwrap();
        assert_eq!(handle.current_lobby(), Some(lobby_id));

        let invites: Vec<_> = (1..=5u64).map(|account| handle.invite(account)).collect();
        for result in futures::future::join_all(invites).await {
            result.unwrap();
        }

        assert_eq!(host.max_in_flight(), 1);
        assert_eq!(host.invited(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_blocks_until_connected_with_backoff() {
        let host = Arc::new(MockGameHost::new());
        host.fail_connects(3);
        let (handle, _task) = spawn_worker("w1".to_string(), host.clone(), fast_settings());

        handle.invite(7).await.unwrap();

        assert_eq!(host.connect_attempts.load(Ordering::SeqCst), 4);
        assert!(handle.is_ready());
        assert_eq!(host.invited(), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_signal_releases_blocked_queue() {
        let host = Arc::new(MockGameHost::new());
        host.fail_connects(usize::MAX);
        let (handle, _task) = spawn_worker("w1".to_string(), host.clone(), fast_settings());

        let waiting = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.invite(9).await })
        };
        sleep(Duration::from_millis(100)).await;
        assert!(host.invited().is_empty());

        handle.set_ready(true);
        waiting.await.unwrap().unwrap();
        assert_eq!(host.invited(), vec![9]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_times_out_when_never_ready() {
        let host = Arc::new(MockGameHost::new());
        host.fail_connects(usize::MAX);
        let (handle, _task) = spawn_worker("w1".to_string(), host, fast_settings());

        let err = handle.launch().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_shutdown_closes_queue() {
        let host = Arc::new(MockGameHost::new());
        let (handle, task) = spawn_worker("w1".to_string(), host.clone(), fast_settings());
        host.seat(1, GameSide::Primary);
        handle.team_snapshot().await.unwrap();

        assert!(handle.request_shutdown());
        task.await.unwrap();
        assert!(handle.invite(1).await.is_err());
        assert!(!handle.is_ready());
    }
}
