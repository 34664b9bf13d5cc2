//! Live worker registry
//!
//! Holds the runner of every worker that currently has a live connection to
//! the hosting service. Eviction removes the entry and stops its runner.

use crate::error::{OrchestratorError, Result};
use crate::types::{WorkerId, WorkerRecord};
use crate::worker::host::GameHostFactory;
use crate::worker::runner::{spawn_worker, RunnerSettings, WorkerHandle};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct LiveWorker {
    handle: WorkerHandle,
    task: JoinHandle<()>,
}

pub struct WorkerRegistry {
    factory: Arc<dyn GameHostFactory>,
    settings: RunnerSettings,
    live: RwLock<HashMap<WorkerId, LiveWorker>>,
}

impl WorkerRegistry {
    pub fn new(factory: Arc<dyn GameHostFactory>, settings: RunnerSettings) -> Self {
        Self {
            factory,
            settings,
            live: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, worker_id: &str) -> Result<Option<WorkerHandle>> {
        let live = self
            .live
            .read()
            .map_err(|_| OrchestratorError::lock("worker registry"))?;
        Ok(live.get(worker_id).map(|worker| worker.handle.clone()))
    }

    /// Return the live handle for a worker, spawning its runner if needed.
    /// The boolean is true when a new runner was started.
    pub fn activate(&self, record: &WorkerRecord) -> Result<(WorkerHandle, bool)> {
        let mut live = self
            .live
            .write()
            .map_err(|_| OrchestratorError::lock("worker registry"))?;

        if let Some(worker) = live.get(&record.id) {
            if !worker.task.is_finished() {
                return Ok((worker.handle.clone(), false));
            }
            warn!("Worker {} runner had stopped, restarting", record.id);
        }

        let host = self.factory.create(record);
        let (handle, task) = spawn_worker(record.id.clone(), host, self.settings.clone());
        live.insert(
            record.id.clone(),
            LiveWorker {
                handle: handle.clone(),
                task,
            },
        );
        info!("Worker {} activated ({} live)", record.id, live.len());
        Ok((handle, true))
    }

    /// Remove a worker from the live set and stop its runner
    pub fn evict(&self, worker_id: &str) -> Result<bool> {
        let removed = self
            .live
            .write()
            .map_err(|_| OrchestratorError::lock("worker registry"))?
            .remove(worker_id);

        match removed {
            Some(worker) => {
                if !worker.handle.request_shutdown() {
                    worker.task.abort();
                }
                info!("Worker {} evicted from live registry", worker_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Open or close a worker's command gate; false if the worker is not live
    pub fn signal_ready(&self, worker_id: &str, ready: bool) -> Result<bool> {
        Ok(match self.get(worker_id)? {
            Some(handle) => {
                handle.set_ready(ready);
                true
            }
            None => false,
        })
    }

    pub fn live_ids(&self) -> Result<Vec<WorkerId>> {
        let live = self
            .live
            .read()
            .map_err(|_| OrchestratorError::lock("worker registry"))?;
        let mut ids: Vec<WorkerId> = live.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    pub fn live_count(&self) -> usize {
        self.live.read().map(|live| live.len()).unwrap_or(0)
    }

    /// Stop every runner
    pub fn shutdown_all(&self) -> Result<()> {
        for worker_id in self.live_ids()? {
            self.evict(&worker_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::mock::MockHostFactory;

    #[tokio::test]
    async fn test_activate_reuses_live_runner() {
        let registry = WorkerRegistry::new(Arc::new(MockHostFactory::new()), RunnerSettings::default());
        let record = WorkerRecord::new("w1");

        let (_, started) = registry.activate(&record).unwrap();
        assert!(started);
        let (_, started) = registry.activate(&record).unwrap();
        assert!(!started);
        assert_eq!(registry.live_count(), 1);

        assert!(registry.signal_ready("w1", true).unwrap());
        assert!(registry.get("w1").unwrap().unwrap().is_ready());

        assert!(registry.evict("w1").unwrap());
        assert!(!registry.evict("w1").unwrap());
        assert!(registry.get("w1").unwrap().is_none());
        assert!(!registry.signal_ready("w1", true).unwrap());
    }
}
