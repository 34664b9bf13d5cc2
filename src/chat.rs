//! Chat platform gateway
//!
//! The chat platform is an external collaborator. The orchestrator posts
//! notifications, resolves community members, and manages the per-lobby room.

use crate::error::{OrchestratorError, Result};
use crate::types::{
    Faction, GameMode, LeagueId, LobbyId, MatchId, PlayerId, RatingChange, SlotId, WorkerId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

/// Where a notification is posted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatTarget {
    League(LeagueId),
    Room(String),
}

/// Ways a community member can be referenced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberQuery {
    Id(PlayerId),
    Mention(String),
    Nickname(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionDecision {
    DraftOrder,
    Side,
}

/// Messages the orchestrator posts to the community
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    LobbyOpened {
        lobby_id: LobbyId,
        slot: SlotId,
    },
    QueueUpdated {
        slot: SlotId,
        queued: usize,
    },
    ReadyCheckStarted {
        lobby_id: LobbyId,
        name: String,
        players: Vec<PlayerId>,
        deadline: DateTime<Utc>,
    },
    ReadyCheckExpired {
        lobby_id: LobbyId,
        evicted: Vec<PlayerId>,
        returned: Vec<PlayerId>,
    },
    PlayersReady {
        lobby_id: LobbyId,
    },
    SelectionPrompt {
        lobby_id: LobbyId,
        captain: PlayerId,
        decision: SelectionDecision,
    },
    DraftTurn {
        lobby_id: LobbyId,
        captain: PlayerId,
        remaining: usize,
    },
    PlayerDrafted {
        lobby_id: LobbyId,
        captain: PlayerId,
        player: PlayerId,
        faction: Faction,
    },
    TeamsSelected {
        lobby_id: LobbyId,
        faction_one: Vec<PlayerId>,
        faction_two: Vec<PlayerId>,
        game_mode: Option<GameMode>,
    },
    LobbyHosted {
        lobby_id: LobbyId,
        name: String,
        password: String,
        worker_id: WorkerId,
    },
    MatchStarted {
        lobby_id: LobbyId,
        match_id: MatchId,
    },
    MatchCompleted {
        lobby_id: LobbyId,
        match_id: Option<MatchId>,
        winner: Option<Faction>,
        rating_changes: Vec<RatingChange>,
    },
    LobbyKilled {
        lobby_id: LobbyId,
    },
    LobbyFailed {
        lobby_id: LobbyId,
        reason: String,
    },
    ChallengeIssued {
        giver: PlayerId,
        recipient: PlayerId,
    },
    Relay {
        author: String,
        text: String,
    },
}

/// Chat platform operations used by the orchestrator
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Post a notification to a league channel or lobby room
    async fn post(&self, target: ChatTarget, notification: Notification) -> Result<()>;

    /// Resolve a reference to a current community member
    async fn resolve_member(&self, league_id: LeagueId, query: MemberQuery) -> Result<Option<PlayerId>>;

    /// Ensure a room exists under a category and return its id
    async fn ensure_room(&self, category: &str, name: &str) -> Result<String>;

    /// Grant or revoke visibility of a room
    async fn set_room_access(&self, room: &str, members: &[PlayerId], visible: bool) -> Result<()>;

    async fn rename_room(&self, room: &str, name: &str) -> Result<()>;

    async fn remove_room(&self, room: &str) -> Result<()>;
}

/// In-process gateway that records everything it is asked to do
#[derive(Debug, Default)]
pub struct MockChatGateway {
    posts: Mutex<Vec<(ChatTarget, Notification)>>,
    rooms: RwLock<HashMap<String, String>>,
    visible: RwLock<HashMap<String, HashSet<PlayerId>>>,
    departed: RwLock<HashSet<PlayerId>>,
    rooms_created: AtomicUsize,
}

impl MockChatGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a member unresolvable, as if they left the community
    pub fn depart(&self, player_id: &str) -> Result<()> {
        self.departed
            .write()
            .map_err(|_| OrchestratorError::lock("departed"))?
            .insert(player_id.to_string());
        Ok(())
    }

    pub fn posts(&self) -> Vec<(ChatTarget, Notification)> {
        self.posts.lock().map(|posts| posts.clone()).unwrap_or_default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.posts().into_iter().map(|(_, notification)| notification).collect()
    }

    pub fn rooms_created(&self) -> usize {
        self.rooms_created.load(Ordering::SeqCst)
    }

    pub fn room_names(&self) -> Vec<String> {
        self.rooms
            .read()
            .map(|rooms| rooms.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn visible_to(&self, room: &str) -> HashSet<PlayerId> {
        self.visible
            .read()
            .ok()
            .and_then(|visible| visible.get(room).cloned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatGateway for MockChatGateway {
    async fn post(&self, target: ChatTarget, notification: Notification) -> Result<()> {
        self.posts
            .lock()
            .map_err(|_| OrchestratorError::lock("posts"))?
            .push((target, notification));
        Ok(())
    }

    async fn resolve_member(&self, _league_id: LeagueId, query: MemberQuery) -> Result<Option<PlayerId>> {
        let departed = self
            .departed
            .read()
            .map_err(|_| OrchestratorError::lock("departed"))?;
        let id = match query {
            MemberQuery::Id(id) => id,
            MemberQuery::Mention(mention) => mention
                .trim_start_matches("<@")
                .trim_end_matches('>')
                .to_string(),
            MemberQuery::Nickname(_) => return Ok(None),
        };
        Ok((!departed.contains(&id)).then_some(id))
    }

    async fn ensure_room(&self, category: &str, name: &str) -> Result<String> {
        let mut rooms = self
            .rooms
            .write()
            .map_err(|_| OrchestratorError::lock("rooms"))?;
        let id = rooms.entry(name.to_string()).or_insert_with(|| {
            self.rooms_created.fetch_add(1, Ordering::SeqCst);
            format!("{}/{}", category, name)
        });
        Ok(id.clone())
    }

    async fn set_room_access(&self, room: &str, members: &[PlayerId], visible: bool) -> Result<()> {
        let mut access = self
            .visible
            .write()
            .map_err(|_| OrchestratorError::lock("visibility"))?;
        let entry = access.entry(room.to_string()).or_default();
        for member in members {
            if visible {
                entry.insert(member.clone());
            } else {
                entry.remove(member);
            }
        }
        Ok(())
    }

    async fn rename_room(&self, room: &str, name: &str) -> Result<()> {
        let mut rooms = self
            .rooms
            .write()
            .map_err(|_| OrchestratorError::lock("rooms"))?;
        let old = rooms
            .iter()
            .find(|(_, id)| id.as_str() == room)
            .map(|(old, _)| old.clone());
        if let Some(old) = old {
            rooms.remove(&old);
            rooms.insert(name.to_string(), room.to_string());
        }
        Ok(())
    }

    async fn remove_room(&self, room: &str) -> Result<()> {
        let mut rooms = self
            .rooms
            .write()
            .map_err(|_| OrchestratorError::lock("rooms"))?;
        rooms.retain(|_, id| id.as_str() != room);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_ensure_room_is_idempotent() {
        let chat = MockChatGateway::new();
        let first = chat.ensure_room("inhouse", "lobby-1").await.unwrap();
        let second = chat.ensure_room("inhouse", "lobby-1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(chat.rooms_created(), 1);
    }

    #[tokio::test]
    async fn test_departed_member_is_unresolved() {
        let chat = MockChatGateway::new();
        let league = Uuid::new_v4();
        assert_eq!(
            chat.resolve_member(league, MemberQuery::Mention("<@42>".to_string()))
                .await
                .unwrap(),
            Some("42".to_string())
        );

        chat.depart("42").unwrap();
        assert_eq!(
            chat.resolve_member(league, MemberQuery::Id("42".to_string()))
                .await
                .unwrap(),
            None
        );
    }
}
