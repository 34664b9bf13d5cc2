//! Events accepted by the coordinator queue

use crate::chat::MemberQuery;
use crate::error::Result;
use crate::lobby::LobbyState;
use crate::types::{
    GameMode, League, LeagueId, LobbyId, Player, PlayerId, Season, SlotId, WorkerId, WorkerRecord,
    WorkerStatus,
};
use crate::worker::WorkerSignal;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Commands issued by players through the chat layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum PlayerCommand {
    Register {
        player: Player,
    },
    JoinQueue {
        player_id: PlayerId,
        league_id: LeagueId,
        slot_id: SlotId,
    },
    /// Leave one slot, or every slot of the league when `slot_id` is absent
    LeaveQueue {
        player_id: PlayerId,
        league_id: LeagueId,
        slot_id: Option<SlotId>,
    },
    Ready {
        player_id: PlayerId,
    },
    ChooseDraftOrder {
        player_id: PlayerId,
        draft_first: bool,
    },
    ChooseSide {
        player_id: PlayerId,
        take_primary: bool,
    },
    Pick {
        captain_id: PlayerId,
        pick: MemberQuery,
    },
    IssueChallenge {
        giver: PlayerId,
        recipient: MemberQuery,
    },
    AcceptChallenge {
        player_id: PlayerId,
        giver: PlayerId,
    },
    SetGameMode {
        player_id: PlayerId,
        mode: Option<GameMode>,
    },
}

impl PlayerCommand {
    pub fn player_id(&self) -> &str {
        match self {
            PlayerCommand::Register { player } => &player.id,
            PlayerCommand::JoinQueue { player_id, .. }
            | PlayerCommand::LeaveQueue { player_id, .. }
            | PlayerCommand::Ready { player_id }
            | PlayerCommand::ChooseDraftOrder { player_id, .. }
            | PlayerCommand::ChooseSide { player_id, .. }
            | PlayerCommand::AcceptChallenge { player_id, .. }
            | PlayerCommand::SetGameMode { player_id, .. } => player_id,
            PlayerCommand::Pick { captain_id, .. } => captain_id,
            PlayerCommand::IssueChallenge { giver, .. } => giver,
        }
    }
}

/// Administrative overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum OperatorCommand {
    ForceState {
        lobby_id: LobbyId,
        state: LobbyState,
    },
    AssignCaptains {
        lobby_id: LobbyId,
        first: PlayerId,
        second: PlayerId,
    },
    SetWorkerStatus {
        worker_id: WorkerId,
        status: WorkerStatus,
    },
    AddWorker {
        worker: WorkerRecord,
    },
    RemoveWorker {
        worker_id: WorkerId,
    },
    ListWorkers,
    ConfigureLeague {
        league: League,
    },
    StartSeason {
        league_id: LeagueId,
        name: String,
    },
}

#[derive(Debug, Clone)]
pub enum OperatorReply {
    Done,
    Workers(Vec<WorkerRecord>),
    Season(Season),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    ReadyCheck,
    WorkerWait,
}

/// Everything that can mutate orchestration state
#[derive(Debug)]
pub enum Event {
    RunLobby(LobbyId),
    /// Run every open lobby of a queue slot
    RunSlot {
        league_id: LeagueId,
        slot_id: SlotId,
    },
    Player(PlayerCommand),
    Worker(WorkerSignal),
    TimerFired {
        lobby_id: LobbyId,
        timer: TimerKind,
        generation: u64,
    },
    /// Poll the statistics feed for every running match
    SweepResults,
    ChatRelay {
        lobby_id: LobbyId,
        author: String,
        text: String,
    },
    MemberDeparted {
        player_id: PlayerId,
    },
    Operator {
        command: OperatorCommand,
        reply: Option<oneshot::Sender<Result<OperatorReply>>>,
    },
}

impl Event {
    /// Label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Event::RunLobby(_) => "run_lobby",
            Event::RunSlot { .. } => "run_slot",
            Event::Player(_) => "player",
            Event::Worker(_) => "worker",
            Event::TimerFired {
                timer: TimerKind::ReadyCheck,
                ..
            } => "ready_check_timer",
            Event::TimerFired {
                timer: TimerKind::WorkerWait,
                ..
            } => "worker_wait_timer",
            Event::SweepResults => "sweep_results",
            Event::ChatRelay { .. } => "chat_relay",
            Event::MemberDeparted { .. } => "member_departed",
            Event::Operator { .. } => "operator",
        }
    }
}
