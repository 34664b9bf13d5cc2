//! Game hosting capability
//!
//! A `GameHost` is the client of the external game-hosting service, bound to a
//! single worker account. The orchestrator never calls it directly; commands go
//! through the worker's serialized command queue (see `runner`).

use crate::error::Result;
use crate::types::{AccountId, ExternalLobbyId, GameMode, GameSide, LeagueId, MatchId, WorkerId, WorkerRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Options for creating an external lobby
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostLobbyOptions {
    pub league_id: LeagueId,
    pub name: String,
    pub password: String,
    pub game_mode: GameMode,
    pub ticket: Option<u64>,
}

/// Who sits on which side of the live game lobby
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamSnapshot {
    pub external_lobby_id: Option<ExternalLobbyId>,
    pub seats: HashMap<AccountId, GameSide>,
}

impl TeamSnapshot {
    /// Whether every expected account sits on its expected side
    pub fn matches(&self, expected: &HashMap<AccountId, GameSide>) -> bool {
        expected
            .iter()
            .all(|(account, side)| self.seats.get(account) == Some(side))
    }
}

#[async_trait]
pub trait GameHost: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn create_lobby(&self, options: &HostLobbyOptions) -> Result<ExternalLobbyId>;
    async fn join_lobby(&self, lobby_id: ExternalLobbyId, password: &str) -> Result<()>;
    async fn invite(&self, account_id: AccountId) -> Result<()>;
    async fn team_snapshot(&self) -> Result<TeamSnapshot>;
    async fn launch(&self) -> Result<()>;
    async fn send_chat(&self, text: &str) -> Result<()>;
    async fn leave_lobby(&self) -> Result<()>;
    /// Leave a running match without waiting for it to end
    async fn abandon_match(&self) -> Result<()>;
    async fn destroy_lobby(&self) -> Result<()>;
}

/// Builds the host client for a worker account
pub trait GameHostFactory: Send + Sync {
    fn create(&self, worker: &WorkerRecord) -> Arc<dyn GameHost>;
}

/// Events a worker's host client reports back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum WorkerSignal {
    Ready {
        worker_id: WorkerId,
    },
    Disconnected {
        worker_id: WorkerId,
    },
    LobbyMembersChanged {
        worker_id: WorkerId,
    },
    MatchStarted {
        worker_id: WorkerId,
        match_id: MatchId,
    },
    MatchEnded {
        worker_id: WorkerId,
        winning_side: Option<GameSide>,
    },
    Chat {
        worker_id: WorkerId,
        author: String,
        text: String,
    },
    Fatal {
        worker_id: WorkerId,
        reason: String,
    },
}

impl WorkerSignal {
    pub fn worker_id(&self) -> &str {
        match self {
            WorkerSignal::Ready { worker_id }
            | WorkerSignal::Disconnected { worker_id }
            | WorkerSignal::LobbyMembersChanged { worker_id }
            | WorkerSignal::MatchStarted { worker_id, .. }
            | WorkerSignal::MatchEnded { worker_id, .. }
            | WorkerSignal::Chat { worker_id, .. }
            | WorkerSignal::Fatal { worker_id, .. } => worker_id,
        }
    }
}
