//! Cancellable lobby timers
//!
//! A timer is a spawned task that sleeps and then enqueues a `TimerFired`
//! event. Each timer carries a generation number so a firing that raced with
//! its own cancellation is recognized and ignored.

use crate::coordinator::event::{Event, TimerKind};
use crate::coordinator::CoordinatorHandle;
use crate::types::LobbyId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct ArmedTimer {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
pub struct LobbyTimers {
    armed: HashMap<(LobbyId, TimerKind), ArmedTimer>,
    next_generation: u64,
}

impl LobbyTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer unless the same one is already running
    pub fn start(&mut self, lobby_id: LobbyId, kind: TimerKind, delay: Duration, handle: &CoordinatorHandle) {
        if self.is_armed(lobby_id, kind) {
            return;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let handle = handle.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let fired = Event::TimerFired {
                lobby_id,
                timer: kind,
                generation,
            };
            if let Err(e) = handle.submit(fired) {
                warn!("Timer {:?} for lobby {} could not be delivered: {}", kind, lobby_id, e);
            }
        });

        debug!("Armed {:?} timer for lobby {} ({:?})", kind, lobby_id, delay);
        self.armed.insert((lobby_id, kind), ArmedTimer { generation, task });
    }

    pub fn cancel(&mut self, lobby_id: LobbyId, kind: TimerKind) -> bool {
        match self.armed.remove(&(lobby_id, kind)) {
            Some(timer) => {
                timer.task.abort();
                debug!("Cancelled {:?} timer for lobby {}", kind, lobby_id);
                true
            }
            None => false,
        }
    }

    /// Consume a firing; false when the timer was cancelled or replaced meanwhile
    pub fn fired(&mut self, lobby_id: LobbyId, kind: TimerKind, generation: u64) -> bool {
        match self.armed.get(&(lobby_id, kind)) {
            Some(timer) if timer.generation == generation => {
                self.armed.remove(&(lobby_id, kind));
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, lobby_id: LobbyId, kind: TimerKind) -> bool {
        self.armed
            .get(&(lobby_id, kind))
            .map_or(false, |timer| !timer.task.is_finished())
    }

    /// Cancel every worker wait and return the lobbies that were waiting
    pub fn take_worker_waiters(&mut self) -> Vec<LobbyId> {
        let waiting: Vec<LobbyId> = self
            .armed
            .keys()
            .filter(|(_, kind)| *kind == TimerKind::WorkerWait)
            .map(|(lobby_id, _)| *lobby_id)
            .collect();
        for lobby_id in &waiting {
            self.cancel(*lobby_id, TimerKind::WorkerWait);
        }
        waiting
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.armed.drain() {
            timer.task.abort();
        }
    }
}
