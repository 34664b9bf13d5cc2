//! Worker scheduler
//!
//! Hands workers to lobbies. `assign` and `release` are the only code paths
//! that change a worker's lobby binding, and a worker bound to a non-terminal
//! lobby is never offered again until it is released.

use crate::error::{OrchestratorError, Result};
use crate::store::Store;
use crate::types::{League, Lobby, WorkerId, WorkerRecord, WorkerStatus};
use crate::worker::registry::WorkerRegistry;
use crate::worker::runner::WorkerHandle;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Requirements a worker must satisfy for an assignment
#[derive(Debug, Clone, Default)]
pub struct AssignmentContext {
    /// Affiliation ticket the worker must hold
    pub ticket: Option<u64>,
}

impl AssignmentContext {
    pub fn for_league(league: &League) -> Self {
        Self {
            ticket: league.ticket_id,
        }
    }
}

pub struct WorkerScheduler {
    store: Arc<dyn Store>,
    registry: WorkerRegistry,
}

impl WorkerScheduler {
    pub fn new(store: Arc<dyn Store>, registry: WorkerRegistry) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Whether the worker is bound to a lobby that has not reached a terminal state
    async fn is_bound(&self, worker: &WorkerRecord) -> Result<bool> {
        match worker.lobby_id {
            Some(lobby_id) => Ok(self
                .store
                .get_lobby(lobby_id)
                .await?
                .map_or(false, |lobby| !lobby.state.is_terminal())),
            None => Ok(false),
        }
    }

    /// Any worker free to host, preferring ones already online
    pub async fn find_unassigned_worker(&self, context: &AssignmentContext) -> Result<Option<WorkerRecord>> {
        let mut candidates = Vec::new();
        for worker in self.store.list_workers().await? {
            if matches!(worker.status, WorkerStatus::Unavailable | WorkerStatus::Loading) {
                continue;
            }
            if !worker.holds_ticket(context.ticket) {
                continue;
            }
            if self.is_bound(&worker).await? {
                continue;
            }
            candidates.push(worker);
        }

        candidates.sort_by_key(|worker| (worker.status != WorkerStatus::Online, worker.id.clone()));
        let found = candidates.into_iter().next();
        debug!(
            "Worker search (ticket {:?}) found {:?}",
            context.ticket,
            found.as_ref().map(|w| &w.id)
        );
        Ok(found)
    }

    /// Bind a worker to a lobby
    pub async fn assign(&self, lobby: &mut Lobby, worker_id: &str) -> Result<WorkerRecord> {
        let mut worker = self
            .store
            .get_worker(worker_id)
            .await?
            .ok_or_else(|| OrchestratorError::WorkerNotFound {
                worker_id: worker_id.to_string(),
            })?;

        if worker.lobby_id != Some(lobby.id) && self.is_bound(&worker).await? {
            return Err(OrchestratorError::WorkerUnavailable {
                worker_id: worker_id.to_string(),
            }
            .into());
        }

        worker.lobby_id = Some(lobby.id);
        self.store.save_worker(&worker).await?;
        lobby.worker_id = Some(worker.id.clone());
        info!("Worker {} assigned to lobby {}", worker.id, lobby.id);
        Ok(worker)
    }

    /// Unbind the lobby's worker, returning its id if there was one
    pub async fn release(&self, lobby: &mut Lobby) -> Result<Option<WorkerId>> {
        let Some(worker_id) = lobby.worker_id.take() else {
            return Ok(None);
        };
        lobby.external_lobby_id = None;
        lobby.launched_at = None;

        if let Some(mut worker) = self.store.get_worker(&worker_id).await? {
            if worker.lobby_id == Some(lobby.id) {
                worker.lobby_id = None;
                self.store.save_worker(&worker).await?;
            }
        }
        info!("Worker {} released from lobby {}", worker_id, lobby.id);
        Ok(Some(worker_id))
    }

    /// Drop a worker from the live registry after a fatal error.
    ///
    /// The record is marked unavailable so the worker is not offered again
    /// until an operator sets it back online.
    pub async fn evict(&self, worker_id: &str, reason: &str) -> Result<()> {
        warn!("Evicting worker {}: {}", worker_id, reason);
        self.registry.evict(worker_id)?;
        if let Some(mut worker) = self.store.get_worker(worker_id).await? {
            worker.status = WorkerStatus::Unavailable;
            self.store.save_worker(&worker).await?;
        }
        Ok(())
    }

    pub fn handle(&self, worker_id: &str) -> Result<Option<WorkerHandle>> {
        self.registry.get(worker_id)
    }

    /// Live handle for a worker, starting its runner if necessary
    pub async fn activate(&self, worker: &WorkerRecord) -> Result<WorkerHandle> {
        let (handle, started) = self.registry.activate(worker)?;
        if started {
            let mut record = worker.clone();
            record.status = WorkerStatus::Loading;
            self.store.save_worker(&record).await?;
        }
        Ok(handle)
    }

    pub fn signal_ready(&self, worker_id: &str, ready: bool) -> Result<bool> {
        self.registry.signal_ready(worker_id, ready)
    }

    pub async fn register(&self, worker: WorkerRecord) -> Result<()> {
        if self.store.get_worker(&worker.id).await?.is_some() {
            return Err(OrchestratorError::invalid_command(format!(
                "Worker {} already exists",
                worker.id
            ))
            .into());
        }
        info!("Registering worker {}", worker.id);
        self.store.save_worker(&worker).await
    }

    /// Remove a worker that is not serving a lobby
    pub async fn remove(&self, worker_id: &str) -> Result<()> {
        let worker = self
            .store
            .get_worker(worker_id)
            .await?
            .ok_or_else(|| OrchestratorError::WorkerNotFound {
                worker_id: worker_id.to_string(),
            })?;
        if self.is_bound(&worker).await? {
            return Err(OrchestratorError::invalid_command(format!(
                "Worker {} is serving lobby {:?}",
                worker_id, worker.lobby_id
            ))
            .into());
        }
        self.registry.evict(worker_id)?;
        self.store.delete_worker(worker_id).await?;
        info!("Removed worker {}", worker_id);
        Ok(())
    }

    pub async fn set_status(&self, worker_id: &str, status: WorkerStatus) -> Result<WorkerRecord> {
        let mut worker = self
            .store
            .get_worker(worker_id)
            .await?
            .ok_or_else(|| OrchestratorError::WorkerNotFound {
                worker_id: worker_id.to_string(),
            })?;
        worker.status = status;
        self.store.save_worker(&worker).await?;
        info!("Worker {} status set to {}", worker_id, status);
        Ok(worker)
    }

    pub async fn list(&self) -> Result<Vec<WorkerRecord>> {
        self.store.list_workers().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::LobbyState;
    use crate::store::InMemoryStore;
    use crate::types::{QueueKind, QueueSlot};
    use crate::worker::mock::MockHostFactory;
    use crate::worker::runner::RunnerSettings;
    use uuid::Uuid;

    fn scheduler(store: Arc<InMemoryStore>) -> WorkerScheduler {
        let registry = WorkerRegistry::new(Arc::new(MockHostFactory::new()), RunnerSettings::default());
        WorkerScheduler::new(store, registry)
    }

    fn lobby(state: LobbyState) -> Lobby {
        let mut lobby = Lobby::new(Uuid::new_v4(), QueueSlot::new("draft", QueueKind::Draft));
        lobby.state = state;
        lobby
    }

    #[tokio::test]
    async fn test_bound_worker_is_never_offered() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = scheduler(store.clone());
        scheduler.register(WorkerRecord::new("w1")).await.unwrap();

        let mut first = lobby(LobbyState::WaitingForWorker);
        store.save_lobby(&first).await.unwrap();
        let context = AssignmentContext::default();

        let found = scheduler.find_unassigned_worker(&context).await.unwrap().unwrap();
        scheduler.assign(&mut first, &found.id).await.unwrap();
        store.save_lobby(&first).await.unwrap();
        assert!(scheduler.find_unassigned_worker(&context).await.unwrap().is_none());

        let mut second = lobby(LobbyState::WaitingForWorker);
        assert!(scheduler.assign(&mut second, "w1").await.is_err());

        assert_eq!(scheduler.release(&mut first).await.unwrap(), Some("w1".to_string()));
        store.save_lobby(&first).await.unwrap();
        assert!(scheduler.find_unassigned_worker(&context).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_terminal_lobby_does_not_hold_worker() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = scheduler(store.clone());
        scheduler.register(WorkerRecord::new("w1")).await.unwrap();

        let mut done = lobby(LobbyState::WaitingForWorker);
        scheduler.assign(&mut done, "w1").await.unwrap();
        done.state = LobbyState::Killed;
        store.save_lobby(&done).await.unwrap();

        let found = scheduler
            .find_unassigned_worker(&AssignmentContext::default())
            .await
            .unwrap();
        assert_eq!(found.map(|w| w.id), Some("w1".to_string()));
    }

    #[tokio::test]
    async fn test_ticket_and_status_filters() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = scheduler(store.clone());
        let mut ticketed = WorkerRecord::new("b-ticketed");
        ticketed.tickets = vec![77];
        scheduler.register(ticketed).await.unwrap();
        scheduler.register(WorkerRecord::new("a-plain")).await.unwrap();
        let mut down = WorkerRecord::new("c-down");
        down.tickets = vec![77];
        down.status = WorkerStatus::Unavailable;
        scheduler.register(down).await.unwrap();

        let found = scheduler
            .find_unassigned_worker(&AssignmentContext { ticket: Some(77) })
            .await
            .unwrap();
        assert_eq!(found.map(|w| w.id), Some("b-ticketed".to_string()));

        scheduler.set_status("a-plain", WorkerStatus::Online).await.unwrap();
        let found = scheduler
            .find_unassigned_worker(&AssignmentContext::default())
            .await
            .unwrap();
        assert_eq!(found.map(|w| w.id), Some("a-plain".to_string()));
    }

    #[tokio::test]
    async fn test_evicted_worker_waits_for_operator() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = scheduler(store.clone());
        scheduler.register(WorkerRecord::new("w1")).await.unwrap();
        let context = AssignmentContext::default();

        let mut failed = lobby(LobbyState::WorkerAssigned);
        scheduler.assign(&mut failed, "w1").await.unwrap();
        scheduler.evict("w1", "create failed").await.unwrap();
        scheduler.release(&mut failed).await.unwrap();
        failed.state = LobbyState::WorkerFailed;
        store.save_lobby(&failed).await.unwrap();

        assert!(scheduler.find_unassigned_worker(&context).await.unwrap().is_none());

        scheduler.set_status("w1", WorkerStatus::Online).await.unwrap();
        let found = scheduler.find_unassigned_worker(&context).await.unwrap();
        assert_eq!(found.map(|w| w.id), Some("w1".to_string()));
    }

    #[tokio::test]
    async fn test_remove_refuses_bound_worker() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = scheduler(store.clone());
        scheduler.register(WorkerRecord::new("w1")).await.unwrap();
        assert!(scheduler.register(WorkerRecord::new("w1")).await.is_err());

        let mut active = lobby(LobbyState::WorkerAssigned);
        scheduler.assign(&mut active, "w1").await.unwrap();
        store.save_lobby(&active).await.unwrap();
        assert!(scheduler.remove("w1").await.is_err());

        scheduler.release(&mut active).await.unwrap();
        store.save_lobby(&active).await.unwrap();
        scheduler.remove("w1").await.unwrap();
        assert!(scheduler.list().await.unwrap().is_empty());
    }
}
