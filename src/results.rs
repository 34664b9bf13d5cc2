//! Match results feed
//!
//! The statistics feed is an external collaborator. The orchestrator asks it
//! for a match's final statistics and gets them, a "not yet", or a definite
//! "unavailable". `CachedResultsFeed` is filled by whatever pushes results in
//! (the AMQP ingress in the service, tests directly).

use crate::error::{OrchestratorError, Result};
use crate::types::{AccountId, GameSide, MatchId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Per-player line of a finished match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerMatchStats {
    pub account_id: AccountId,
    pub side: GameSide,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub hero: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchStats {
    pub match_id: MatchId,
    pub winning_side: Option<GameSide>,
    pub duration_seconds: u64,
    pub players: Vec<PlayerMatchStats>,
}

impl MatchStats {
    pub fn for_account(&self, account_id: AccountId) -> Option<&PlayerMatchStats> {
        self.players.iter().find(|p| p.account_id == account_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum FeedStatus {
    Ready(MatchStats),
    NotYet,
    Unavailable,
}

/// Source of finalized match statistics
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MatchResultsFeed: Send + Sync {
    async fn fetch(&self, match_id: MatchId) -> Result<FeedStatus>;
}

/// Feed backed by pushed results
#[derive(Debug, Default)]
pub struct CachedResultsFeed {
    results: RwLock<HashMap<MatchId, FeedStatus>>,
}

impl CachedResultsFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, match_id: MatchId, status: FeedStatus) -> Result<()> {
        let mut results = self
            .results
            .write()
            .map_err(|_| OrchestratorError::lock("results"))?;
        results.insert(match_id, status);
        Ok(())
    }
}

#[async_trait]
impl MatchResultsFeed for CachedResultsFeed {
    async fn fetch(&self, match_id: MatchId) -> Result<FeedStatus> {
        let results = self
            .results
            .read()
            .map_err(|_| OrchestratorError::lock("results"))?;
        Ok(results.get(&match_id).cloned().unwrap_or(FeedStatus::NotYet))
    }
}
