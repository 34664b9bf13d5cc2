//! Matchmaking algorithms
//!
//! Pure functions used by the lobby state machine: captain-pair selection,
//! team balancing, draft-turn computation, the captain selection sequence and
//! the game-mode vote. Nothing in here performs I/O; randomness is injected
//! through an `Rng` so callers and tests control it.

pub mod balance;
pub mod captains;
pub mod draft;
pub mod selection;
pub mod vote;

// Re-export main types
pub use balance::{balance_teams, TeamSplit, MATCH_SIZE, TEAM_SIZE};
pub use captains::{captain_priority, compile_captain_pattern, select_captain_pair, CaptainCandidate};
pub use draft::{drafting_faction, drafting_seat, validate_draft_order, DraftSeat, DEFAULT_DRAFT_ORDER};
pub use selection::{NextDecision, SelectionState};
pub use vote::vote_game_mode;
