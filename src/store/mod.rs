//! Persistence
//!
//! The orchestrator reads and writes its records through the `Store` trait.
//! Multi-record operations (admitting players, returning them to queue,
//! rotating seasons) are single calls so implementations can make them atomic.

pub mod memory;

use crate::error::Result;
use crate::lobby::LobbyState;
use crate::types::{
    Challenge, ChallengeId, League, LeagueId, Lobby, LobbyId, MatchId, Player, PlayerId,
    PlayerInLobby, QueueMembership, RatingRecord, Season, SeasonId, SlotId, WorkerRecord,
};
use async_trait::async_trait;

pub use memory::InMemoryStore;

#[async_trait]
pub trait Store: Send + Sync {
    // Leagues and seasons
    async fn get_league(&self, league_id: LeagueId) -> Result<Option<League>>;
    async fn save_league(&self, league: &League) -> Result<()>;
    async fn list_leagues(&self) -> Result<Vec<League>>;
    async fn get_season(&self, season_id: SeasonId) -> Result<Option<Season>>;
    /// Deactivate the league's current season, create a new active one and
    /// move the league's season pointer, all at once
    async fn start_season(&self, league_id: LeagueId, name: &str) -> Result<Season>;

    // Players
    async fn get_player(&self, player_id: &str) -> Result<Option<Player>>;
    async fn get_players(&self, player_ids: &[PlayerId]) -> Result<Vec<Player>>;
    async fn save_player(&self, player: &Player) -> Result<()>;
    /// Case-insensitive nickname lookup within a league
    async fn find_player_by_nickname(&self, league_id: LeagueId, nickname: &str) -> Result<Option<Player>>;

    // Queue membership
    /// Add or reactivate a membership; an existing join time is kept
    async fn join_queue(&self, membership: QueueMembership) -> Result<()>;
    async fn leave_queue(&self, player_id: &str, league_id: LeagueId, slot_id: &str) -> Result<bool>;
    /// Active members of a slot ordered by join time
    async fn queue_members(&self, league_id: LeagueId, slot_id: &str) -> Result<Vec<QueueMembership>>;
    async fn memberships_for(&self, player_id: &str) -> Result<Vec<QueueMembership>>;
    /// Remove every membership of the given players
    async fn clear_queues(&self, player_ids: &[PlayerId]) -> Result<()>;
    /// Remove every membership of a slot and return who was in it
    async fn clear_slot(&self, league_id: LeagueId, slot_id: &str) -> Result<Vec<PlayerId>>;

    // Lobbies
    async fn get_lobby(&self, lobby_id: LobbyId) -> Result<Option<Lobby>>;
    async fn save_lobby(&self, lobby: &Lobby) -> Result<()>;
    async fn list_lobbies(&self) -> Result<Vec<Lobby>>;
    async fn lobbies_in_states(&self, states: &[LobbyState]) -> Result<Vec<Lobby>>;
    async fn lobbies_for_slot(&self, league_id: LeagueId, slot_id: &str) -> Result<Vec<Lobby>>;
    async fn lobby_for_worker(&self, worker_id: &str) -> Result<Option<Lobby>>;
    async fn lobby_for_match(&self, match_id: MatchId) -> Result<Option<Lobby>>;
    /// Whether a non-terminal lobby of the league already uses this name
    async fn lobby_name_taken(&self, league_id: LeagueId, name: &str) -> Result<bool>;

    // Lobby players
    async fn lobby_players(&self, lobby_id: LobbyId) -> Result<Vec<PlayerInLobby>>;
    async fn save_lobby_player(&self, player: &PlayerInLobby) -> Result<()>;
    /// Turn queue members of `slot_id` into lobby players, clearing all of
    /// their memberships in the same operation
    async fn admit_players(
        &self,
        lobby_id: LobbyId,
        league_id: LeagueId,
        slot_id: &str,
        player_ids: &[PlayerId],
    ) -> Result<Vec<PlayerInLobby>>;
    /// Remove lobby players and restore them as active members of `slot_id`
    /// with their original join time
    async fn return_to_queue(
        &self,
        lobby_id: LobbyId,
        league_id: LeagueId,
        slot_id: &str,
        player_ids: &[PlayerId],
    ) -> Result<()>;
    async fn remove_lobby_players(&self, lobby_id: LobbyId, player_ids: &[PlayerId]) -> Result<()>;
    async fn clear_lobby_players(&self, lobby_id: LobbyId) -> Result<Vec<PlayerId>>;
    /// The non-terminal lobby a player currently belongs to
    async fn active_lobby_for_player(&self, player_id: &str) -> Result<Option<Lobby>>;

    // Workers
    async fn get_worker(&self, worker_id: &str) -> Result<Option<WorkerRecord>>;
    async fn save_worker(&self, worker: &WorkerRecord) -> Result<()>;
    async fn list_workers(&self) -> Result<Vec<WorkerRecord>>;
    async fn delete_worker(&self, worker_id: &str) -> Result<bool>;

    // Challenges
    async fn get_challenge(&self, challenge_id: ChallengeId) -> Result<Option<Challenge>>;
    async fn find_challenge(&self, giver: &str, recipient: &str) -> Result<Option<Challenge>>;
    async fn save_challenge(&self, challenge: &Challenge) -> Result<()>;
    async fn delete_challenge(&self, challenge_id: ChallengeId) -> Result<bool>;
    async fn challenges_for(&self, player_id: &str) -> Result<Vec<Challenge>>;
    /// Delete unaccepted challenges whose both parties are in `player_ids`
    async fn delete_challenges_among(&self, player_ids: &[PlayerId]) -> Result<usize>;

    // Ratings
    async fn get_rating(&self, player_id: &str, season_id: SeasonId) -> Result<Option<RatingRecord>>;
    async fn save_rating(&self, record: &RatingRecord) -> Result<()>;
}

/// Slot id used for the queue of an accepted challenge
pub fn challenge_slot_id(challenge_id: ChallengeId) -> SlotId {
    format!("challenge-{}", challenge_id)
}
