//! Lobby lifecycle states

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LobbyState {
    New,
    WaitingForQueue,
    BeginReady,
    CheckingReady,
    AssigningCaptains,
    SelectionPriority,
    DraftingPlayers,
    Autobalancing,
    TeamsSelected,
    WaitingForWorker,
    WorkerAssigned,
    WorkerFailed,
    WorkerStarted,
    WaitingForPlayers,
    MatchInProgress,
    MatchEnded,
    MatchStats,
    MatchNoStats,
    PendingKill,
    Killed,
    Completed,
    CompletedNoStats,
    Failed,
}

impl LobbyState {
    pub const ALL: [LobbyState; 23] = [
        LobbyState::New,
        LobbyState::WaitingForQueue,
        LobbyState::BeginReady,
        LobbyState::CheckingReady,
        LobbyState::AssigningCaptains,
        LobbyState::SelectionPriority,
        LobbyState::DraftingPlayers,
        LobbyState::Autobalancing,
        LobbyState::TeamsSelected,
        LobbyState::WaitingForWorker,
        LobbyState::WorkerAssigned,
        LobbyState::WorkerFailed,
        LobbyState::WorkerStarted,
        LobbyState::WaitingForPlayers,
        LobbyState::MatchInProgress,
        LobbyState::MatchEnded,
        LobbyState::MatchStats,
        LobbyState::MatchNoStats,
        LobbyState::PendingKill,
        LobbyState::Killed,
        LobbyState::Completed,
        LobbyState::CompletedNoStats,
        LobbyState::Failed,
    ];

    /// Terminal lobbies never step again without operator action
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LobbyState::Killed
                | LobbyState::Completed
                | LobbyState::CompletedNoStats
                | LobbyState::Failed
                | LobbyState::WorkerFailed
        )
    }

    /// States that still accept new queue members
    pub fn is_open(self) -> bool {
        matches!(self, LobbyState::New | LobbyState::WaitingForQueue)
    }

    /// Pre-match states whose roster is checked before every step
    pub fn requires_full_roster(self) -> bool {
        matches!(
            self,
            LobbyState::BeginReady
                | LobbyState::CheckingReady
                | LobbyState::AssigningCaptains
                | LobbyState::SelectionPriority
                | LobbyState::DraftingPlayers
                | LobbyState::Autobalancing
                | LobbyState::TeamsSelected
                | LobbyState::WaitingForWorker
                | LobbyState::WorkerAssigned
                | LobbyState::WorkerStarted
                | LobbyState::WaitingForPlayers
        )
    }

    /// States in which a worker hosts the external lobby before launch
    pub fn is_hosting(self) -> bool {
        matches!(
            self,
            LobbyState::WorkerAssigned | LobbyState::WorkerStarted | LobbyState::WaitingForPlayers
        )
    }

    /// States in which chat is relayed into the game lobby
    pub fn relays_chat(self) -> bool {
        matches!(
            self,
            LobbyState::WorkerStarted | LobbyState::WaitingForPlayers | LobbyState::MatchInProgress
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LobbyState::New => "NEW",
            LobbyState::WaitingForQueue => "WAITING_FOR_QUEUE",
            LobbyState::BeginReady => "BEGIN_READY",
            LobbyState::CheckingReady => "CHECKING_READY",
            LobbyState::AssigningCaptains => "ASSIGNING_CAPTAINS",
            LobbyState::SelectionPriority => "SELECTION_PRIORITY",
            LobbyState::DraftingPlayers => "DRAFTING_PLAYERS",
            LobbyState::Autobalancing => "AUTOBALANCING",
            LobbyState::TeamsSelected => "TEAMS_SELECTED",
            LobbyState::WaitingForWorker => "WAITING_FOR_WORKER",
            LobbyState::WorkerAssigned => "WORKER_ASSIGNED",
            LobbyState::WorkerFailed => "WORKER_FAILED",
            LobbyState::WorkerStarted => "WORKER_STARTED",
            LobbyState::WaitingForPlayers => "WAITING_FOR_PLAYERS",
            LobbyState::MatchInProgress => "MATCH_IN_PROGRESS",
            LobbyState::MatchEnded => "MATCH_ENDED",
            LobbyState::MatchStats => "MATCH_STATS",
            LobbyState::MatchNoStats => "MATCH_NO_STATS",
            LobbyState::PendingKill => "PENDING_KILL",
            LobbyState::Killed => "KILLED",
            LobbyState::Completed => "COMPLETED",
            LobbyState::CompletedNoStats => "COMPLETED_NO_STATS",
            LobbyState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for LobbyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<LobbyState> = LobbyState::ALL
            .iter()
            .copied()
            .filter(|state| state.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                LobbyState::WorkerFailed,
                LobbyState::Killed,
                LobbyState::Completed,
                LobbyState::CompletedNoStats,
                LobbyState::Failed,
            ]
        );
    }

    #[test]
    fn test_serde_uses_screaming_names() {
        let json = serde_json::to_string(&LobbyState::WaitingForQueue).unwrap();
        assert_eq!(json, "\"WAITING_FOR_QUEUE\"");
        for state in LobbyState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
    }
}
