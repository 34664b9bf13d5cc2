//! Lobby lifecycle
//!
//! This module holds the per-match state machine: the lifecycle states, the
//! queue admission rules that fill a lobby, unique name generation, and the
//! `LobbyMachine` that steps lobbies and applies external triggers.

pub mod admission;
pub mod commands;
pub mod machine;
pub mod naming;
pub mod state;

// Re-export commonly used types
pub use admission::{decide_admission, Admission};
pub use machine::{Effect, LobbyMachine, MachineSettings, Step};
pub use naming::unique_lobby_name;
pub use state::LobbyState;
