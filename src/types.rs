//! Common types used throughout the orchestrator

use crate::lobby::LobbyState;
use crate::matchmaking::SelectionState;
use crate::results::PlayerMatchStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// External community identity of a player
pub type PlayerId = String;

/// Unique identifier for lobbies
pub type LobbyId = Uuid;

/// Unique identifier for leagues
pub type LeagueId = Uuid;

/// Unique identifier for seasons
pub type SeasonId = Uuid;

/// Unique identifier for challenges
pub type ChallengeId = Uuid;

/// Worker account name
pub type WorkerId = String;

/// Queue slot name, unique within a league
pub type SlotId = String;

/// Game-network account id of a player
pub type AccountId = u64;

/// Match id assigned by the game network once a match launches
pub type MatchId = u64;

/// Lobby id inside the external hosting service
pub type ExternalLobbyId = u64;

/// Team membership within a lobby
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Faction {
    #[default]
    Unassigned,
    One,
    Two,
}

impl Faction {
    /// The opposing faction. Unassigned has no opponent.
    pub fn opponent(self) -> Faction {
        match self {
            Faction::One => Faction::Two,
            Faction::Two => Faction::One,
            Faction::Unassigned => Faction::Unassigned,
        }
    }

    pub fn is_assigned(self) -> bool {
        self != Faction::Unassigned
    }
}

impl std::fmt::Display for Faction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Faction::Unassigned => write!(f, "unassigned"),
            Faction::One => write!(f, "faction 1"),
            Faction::Two => write!(f, "faction 2"),
        }
    }
}

/// Side of the game map a team plays on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameSide {
    Primary,
    Secondary,
}

/// Admission rule of a queue slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueKind {
    Draft,
    AutoBalance,
    Challenge,
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueKind::Draft => write!(f, "draft"),
            QueueKind::AutoBalance => write!(f, "autobalance"),
            QueueKind::Challenge => write!(f, "challenge"),
        }
    }
}

/// A named matchmaking channel with a fixed admission rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSlot {
    pub id: SlotId,
    pub kind: QueueKind,
}

impl QueueSlot {
    pub fn new(id: impl Into<SlotId>, kind: QueueKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GameMode {
    AllPick,
    CaptainsMode,
    CaptainsDraft,
    RandomDraft,
    SingleDraft,
    AllRandom,
    Turbo,
}

impl std::fmt::Display for GameMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GameMode::AllPick => "All Pick",
            GameMode::CaptainsMode => "Captains Mode",
            GameMode::CaptainsDraft => "Captains Draft",
            GameMode::RandomDraft => "Random Draft",
            GameMode::SingleDraft => "Single Draft",
            GameMode::AllRandom => "All Random",
            GameMode::Turbo => "Turbo",
        };
        write!(f, "{}", name)
    }
}

/// Which number represents a player's skill during matchmaking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchmakingMetric {
    Rating,
    RankTier,
}

/// A community's matchmaking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct League {
    pub id: LeagueId,
    pub name: String,
    pub ready_check_timeout_seconds: u64,
    pub captain_rank_threshold: f64,
    /// Regex with one numeric capture group, matched against player badges
    pub captain_role_pattern: String,
    pub draft_order: String,
    pub default_game_mode: GameMode,
    pub metric: MatchmakingMetric,
    /// Supports `{league}`, `{id}` and `{slot}` placeholders
    pub lobby_name_template: String,
    /// Affiliation ticket a worker must hold to host for this league
    pub ticket_id: Option<u64>,
    pub current_season_id: Option<SeasonId>,
    pub slots: Vec<QueueSlot>,
    /// Players granted visibility of every lobby room
    pub admins: Vec<PlayerId>,
    pub room_category: String,
    pub initial_rating: f64,
}

impl League {
    pub fn slot(&self, slot_id: &str) -> Option<&QueueSlot> {
        self.slots.iter().find(|slot| slot.id == slot_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Season {
    pub id: SeasonId,
    pub league_id: LeagueId,
    pub name: String,
    pub active: bool,
    pub started_at: DateTime<Utc>,
}

/// A community member registered to matchmake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub league_id: LeagueId,
    pub nickname: String,
    pub account_id: AccountId,
    pub rank_tier: u32,
    pub rating: f64,
    pub badges: Vec<String>,
    pub roles: Vec<String>,
    pub game_mode_preference: Option<GameMode>,
    pub queue_banned_until: Option<DateTime<Utc>>,
}

impl Player {
    pub fn is_queue_banned(&self, now: DateTime<Utc>) -> bool {
        self.queue_banned_until.map_or(false, |until| until > now)
    }

    /// Skill value under the league's matchmaking metric
    pub fn metric_value(&self, metric: MatchmakingMetric) -> f64 {
        match metric {
            MatchmakingMetric::Rating => self.rating,
            MatchmakingMetric::RankTier => self.rank_tier as f64,
        }
    }
}

/// A player's presence in one queue slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMembership {
    pub player_id: PlayerId,
    pub league_id: LeagueId,
    pub slot_id: SlotId,
    pub active: bool,
    pub joined_at: DateTime<Utc>,
}

/// One match instance bound to a queue slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lobby {
    pub id: LobbyId,
    pub league_id: LeagueId,
    pub slot: QueueSlot,
    pub state: LobbyState,
    pub name: Option<String>,
    pub password: Option<String>,
    pub room: Option<String>,
    pub game_mode: Option<GameMode>,
    pub captain_1: Option<PlayerId>,
    pub captain_2: Option<PlayerId>,
    pub selection: SelectionState,
    pub worker_id: Option<WorkerId>,
    pub external_lobby_id: Option<ExternalLobbyId>,
    pub ready_check_started_at: Option<DateTime<Utc>>,
    pub launched_at: Option<DateTime<Utc>>,
    pub match_id: Option<MatchId>,
    pub winner: Option<Faction>,
    pub challenge_id: Option<ChallengeId>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lobby {
    pub fn new(league_id: LeagueId, slot: QueueSlot) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            league_id,
            slot,
            state: LobbyState::New,
            name: None,
            password: None,
            room: None,
            game_mode: None,
            captain_1: None,
            captain_2: None,
            selection: SelectionState::default(),
            worker_id: None,
            external_lobby_id: None,
            ready_check_started_at: None,
            launched_at: None,
            match_id: None,
            winner: None,
            challenge_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn captains(&self) -> Option<(&PlayerId, &PlayerId)> {
        match (&self.captain_1, &self.captain_2) {
            (Some(first), Some(second)) => Some((first, second)),
            _ => None,
        }
    }

    pub fn is_captain(&self, player_id: &str) -> bool {
        self.captain_1.as_deref() == Some(player_id) || self.captain_2.as_deref() == Some(player_id)
    }
}

/// A player's participation record within one lobby
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInLobby {
    pub lobby_id: LobbyId,
    pub player_id: PlayerId,
    pub faction: Faction,
    pub ready: bool,
    /// Original queue join time, restored if the player goes back to queue
    pub queued_at: DateTime<Utc>,
    pub stats: Option<PlayerMatchStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerStatus {
    Loading,
    Online,
    Offline,
    Unavailable,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Loading => write!(f, "loading"),
            WorkerStatus::Online => write!(f, "online"),
            WorkerStatus::Offline => write!(f, "offline"),
            WorkerStatus::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// A hosting-capable account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub display_name: String,
    pub status: WorkerStatus,
    pub lobby_id: Option<LobbyId>,
    pub tickets: Vec<u64>,
}

impl WorkerRecord {
    pub fn new(id: impl Into<WorkerId>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            status: WorkerStatus::Offline,
            lobby_id: None,
            tickets: Vec::new(),
        }
    }

    pub fn holds_ticket(&self, ticket: Option<u64>) -> bool {
        ticket.map_or(true, |ticket| self.tickets.contains(&ticket))
    }
}

/// A pending 1:1 match request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: ChallengeId,
    pub league_id: LeagueId,
    pub giver: PlayerId,
    pub recipient: PlayerId,
    pub accepted: bool,
    pub created_at: DateTime<Utc>,
}

impl Challenge {
    pub fn involves(&self, player_id: &str) -> bool {
        self.giver == player_id || self.recipient == player_id
    }
}

/// A player's standing for one season
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub player_id: PlayerId,
    pub season_id: SeasonId,
    pub rating: f64,
    pub wins: u32,
    pub losses: u32,
}

/// Rating change for one player after a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingChange {
    pub player_id: PlayerId,
    pub old_rating: f64,
    pub new_rating: f64,
    pub change: f64,
}
