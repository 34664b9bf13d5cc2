//! AMQP message definitions and serialization

use crate::chat::{ChatTarget, Notification};
use crate::coordinator::{Event, OperatorCommand, PlayerCommand};
use crate::error::{OrchestratorError, Result};
use crate::results::FeedStatus;
use crate::types::{AccountId, ExternalLobbyId, LobbyId, MatchId, PlayerId};
use crate::worker::{HostLobbyOptions, TeamSnapshot, WorkerSignal};
use serde::{Deserialize, Serialize};

/// Routing keys for outbound chat commands
pub const CHAT_POST_ROUTING_KEY: &str = "chat.post";
pub const CHAT_ROOM_ENSURE_ROUTING_KEY: &str = "chat.room.ensure";
pub const CHAT_ROOM_ACCESS_ROUTING_KEY: &str = "chat.room.access";
pub const CHAT_ROOM_RENAME_ROUTING_KEY: &str = "chat.room.rename";
pub const CHAT_ROOM_REMOVE_ROUTING_KEY: &str = "chat.room.remove";

/// Routing key addressing one worker's host agent
pub fn host_routing_key(worker_id: &str) -> String {
    format!("host.{}", worker_id)
}

/// Message envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    pub fn new(payload: T, routing_key: impl Into<String>) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key: routing_key.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            OrchestratorError::SerializationError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            OrchestratorError::SerializationError {
                message: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Inbound triggers carried by the trigger queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "trigger", content = "body")]
pub enum TriggerMessage {
    Player(PlayerCommand),
    Worker(WorkerSignal),
    Operator(OperatorCommand),
    ChatRelay {
        lobby_id: LobbyId,
        author: String,
        text: String,
    },
    MemberDeparted {
        player_id: PlayerId,
    },
    /// Results pushed by the statistics feed
    MatchResults {
        match_id: MatchId,
        status: FeedStatus,
    },
}

impl TriggerMessage {
    /// The coordinator event for this trigger. Feed results are not events
    /// by themselves and yield `None`.
    pub fn into_event(self) -> Option<Event> {
        match self {
            TriggerMessage::Player(command) => Some(Event::Player(command)),
            TriggerMessage::Worker(signal) => Some(Event::Worker(signal)),
            TriggerMessage::Operator(command) => Some(Event::Operator { command, reply: None }),
            TriggerMessage::ChatRelay { lobby_id, author, text } => Some(Event::ChatRelay { lobby_id, author, text }),
            TriggerMessage::MemberDeparted { player_id } => Some(Event::MemberDeparted { player_id }),
            TriggerMessage::MatchResults { .. } => None,
        }
    }
}

/// Commands published to the chat bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum ChatCommand {
    Post {
        target: ChatTarget,
        notification: Notification,
    },
    EnsureRoom {
        room: String,
        category: String,
        name: String,
    },
    SetRoomAccess {
        room: String,
        members: Vec<PlayerId>,
        visible: bool,
    },
    RenameRoom {
        room: String,
        name: String,
    },
    RemoveRoom {
        room: String,
    },
}

impl ChatCommand {
    pub fn routing_key(&self) -> &'static str {
        match self {
            ChatCommand::Post { .. } => CHAT_POST_ROUTING_KEY,
            ChatCommand::EnsureRoom { .. } => CHAT_ROOM_ENSURE_ROUTING_KEY,
            ChatCommand::SetRoomAccess { .. } => CHAT_ROOM_ACCESS_ROUTING_KEY,
            ChatCommand::RenameRoom { .. } => CHAT_ROOM_RENAME_ROUTING_KEY,
            ChatCommand::RemoveRoom { .. } => CHAT_ROOM_REMOVE_ROUTING_KEY,
        }
    }
}

/// Request sent to a worker's host agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call")]
pub enum HostCall {
    Connect,
    Disconnect,
    CreateLobby { options: HostLobbyOptions },
    JoinLobby { lobby_id: ExternalLobbyId, password: String },
    Invite { account_id: AccountId },
    TeamSnapshot,
    Launch,
    SendChat { text: String },
    LeaveLobby,
    AbandonMatch,
    DestroyLobby,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRequest {
    pub worker_id: String,
    pub call: HostCall,
}

/// Host agent answer, matched to its request by correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result")]
pub enum HostReply {
    Done,
    LobbyCreated { external_lobby_id: ExternalLobbyId },
    Snapshot { snapshot: TeamSnapshot },
    Failed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{MatchStats, PlayerMatchStats};
    use crate::types::GameSide;

    #[test]
    fn test_trigger_wire_format() {
        let json = r#"{
            "payload": {
                "trigger": "Player",
                "body": {"command": "JoinQueue", "player_id": "p1",
                         "league_id": "6a2f41a3-c54c-4b42-b3f0-3f5d0c2d3a11", "slot_id": "draft"}
            },
            "correlation_id": "abc",
            "timestamp": "2024-01-01T00:00:00Z",
            "routing_key": "trigger.player"
        }"#;
        let envelope = MessageEnvelope::<TriggerMessage>::from_bytes(json.as_bytes()).unwrap();
        match envelope.payload {
            TriggerMessage::Player(PlayerCommand::JoinQueue { player_id, slot_id, .. }) => {
                assert_eq!(player_id, "p1");
                assert_eq!(slot_id, "draft");
            }
            other => panic!("unexpected trigger {:?}", other),
        }
    }

    #[test]
    fn test_worker_signal_trigger() {
        let json = r#"{"trigger": "Worker", "body": {"event": "MatchStarted", "worker_id": "w1", "match_id": 77}}"#;
        let trigger: TriggerMessage = serde_json::from_str(json).unwrap();
        let Some(Event::Worker(WorkerSignal::MatchStarted { worker_id, match_id })) = trigger.into_event() else {
            panic!("expected a worker event");
        };
        assert_eq!(worker_id, "w1");
        assert_eq!(match_id, 77);
    }

    #[test]
    fn test_match_results_are_not_events() {
        let trigger = TriggerMessage::MatchResults {
            match_id: 9,
            status: FeedStatus::Ready(MatchStats {
                match_id: 9,
                winning_side: Some(GameSide::Primary),
                duration_seconds: 2400,
                players: vec![PlayerMatchStats {
                    account_id: 1,
                    side: GameSide::Primary,
                    kills: 4,
                    deaths: 2,
                    assists: 11,
                    hero: None,
                }],
            }),
        };
        assert!(trigger.into_event().is_none());
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        assert!(MessageEnvelope::<TriggerMessage>::from_bytes(b"not json").is_err());
    }

    #[test]
    fn test_chat_command_routing() {
        let command = ChatCommand::RenameRoom {
            room: "room-1".to_string(),
            name: "mid-2".to_string(),
        };
        assert_eq!(command.routing_key(), "chat.room.rename");
        assert_eq!(host_routing_key("bot7"), "host.bot7");
    }
}
