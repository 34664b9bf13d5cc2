//! Mock game host for tests and dry runs

use crate::error::{OrchestratorError, Result};
use crate::types::{AccountId, ExternalLobbyId, GameSide, WorkerId, WorkerRecord};
use crate::worker::host::{GameHost, GameHostFactory, HostLobbyOptions, TeamSnapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Scriptable in-process game host
#[derive(Debug, Default)]
pub struct MockGameHost {
    pub connect_attempts: AtomicUsize,
    failing_connects: AtomicUsize,
    fail_create: AtomicBool,
    next_lobby_id: AtomicU64,
    command_delay: RwLock<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    invited: Mutex<Vec<AccountId>>,
    snapshot: RwLock<TeamSnapshot>,
    launches: AtomicUsize,
    chat: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
}

impl MockGameHost {
    pub fn new() -> Self {
        Self {
            next_lobby_id: AtomicU64::new(1000),
            ..Default::default()
        }
    }

    /// Fail the next `count` connects; `usize::MAX` fails forever
    pub fn fail_connects(&self, count: usize) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_command_delay(&self, delay: Duration) {
        if let Ok(mut current) = self.command_delay.write() {
            *current = delay;
        }
    }

    pub fn seat(&self, account_id: AccountId, side: GameSide) {
        if let Ok(mut snapshot) = self.snapshot.write() {
            snapshot.seats.insert(account_id, side);
        }
    }

    pub fn invited(&self) -> Vec<AccountId> {
        self.invited.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn chat_lines(&self) -> Vec<String> {
        self.chat.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|v| v.clone()).unwrap_or_default()
    }

    async fn track(&self, name: &str) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(name.to_string());
        }

        let delay = self
            .command_delay
            .read()
            .map(|d| *d)
            .unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GameHost for MockGameHost {
    async fn connect(&self) -> Result<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != usize::MAX {
                self.failing_connects.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(OrchestratorError::InternalError {
                message: "mock connection refused".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.track("disconnect").await;
        Ok(())
    }

    async fn create_lobby(&self, _options: &HostLobbyOptions) -> Result<ExternalLobbyId> {
        self.track("create_lobby").await;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(OrchestratorError::InternalError {
                message: "mock lobby creation failed".to_string(),
            }
            .into());
        }
        let lobby_id = self.next_lobby_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut snapshot) = self.snapshot.write() {
            snapshot.external_lobby_id = Some(lobby_id);
        }
        Ok(lobby_id)
    }

    async fn join_lobby(&self, lobby_id: ExternalLobbyId, _password: &str) -> Result<()> {
        self.track("join_lobby").await;
        if let Ok(mut snapshot) = self.snapshot.write() {
            snapshot.external_lobby_id = Some(lobby_id);
        }
        Ok(())
    }

    async fn invite(&self, account_id: AccountId) -> Result<()> {
        self.track("invite").await;
        if let Ok(mut invited) = self.invited.lock() {
            invited.push(account_id);
        }
        Ok(())
    }

    async fn team_snapshot(&self) -> Result<TeamSnapshot> {
        self.track("team_snapshot").await;
        self.snapshot
            .read()
            .map(|s| s.clone())
            .map_err(|_| OrchestratorError::lock("snapshot").into())
    }

    async fn launch(&self) -> Result<()> {
        self.track("launch").await;
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_chat(&self, text: &str) -> Result<()> {
        self.track("send_chat").await;
        if let Ok(mut chat) = self.chat.lock() {
            chat.push(text.to_string());
        }
        Ok(())
    }

    async fn leave_lobby(&self) -> Result<()> {
        self.track("leave_lobby").await;
        Ok(())
    }

    async fn abandon_match(&self) -> Result<()> {
        self.track("abandon_match").await;
        Ok(())
    }

    async fn destroy_lobby(&self) -> Result<()> {
        self.track("destroy_lobby").await;
        if let Ok(mut snapshot) = self.snapshot.write() {
            *snapshot = TeamSnapshot::default();
        }
        Ok(())
    }
}

/// Factory handing out one `MockGameHost` per worker
#[derive(Debug, Default)]
pub struct MockHostFactory {
    hosts: RwLock<HashMap<WorkerId, Arc<MockGameHost>>>,
}

impl MockHostFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The host for a worker, created on first use
    pub fn host(&self, worker_id: &str) -> Arc<MockGameHost> {
        if let Ok(hosts) = self.hosts.read() {
            if let Some(host) = hosts.get(worker_id) {
                return host.clone();
            }
        }
        let host = Arc::new(MockGameHost::new());
        if let Ok(mut hosts) = self.hosts.write() {
            return hosts
                .entry(worker_id.to_string())
                .or_insert(host)
                .clone();
        }
        host
    }
}

impl GameHostFactory for MockHostFactory {
    fn create(&self, worker: &WorkerRecord) -> Arc<dyn GameHost> {
        self.host(&worker.id)
    }
}
