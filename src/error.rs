//! Error types for the lobby orchestrator
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific orchestration scenarios
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Lobby validation failed: {reason}")]
    ValidationFailure { reason: String },

    #[error("Worker provisioning failed for {worker_id}: {reason}")]
    WorkerProvisioningFailure { worker_id: String, reason: String },

    #[error("Worker unavailable: {worker_id}")]
    WorkerUnavailable { worker_id: String },

    #[error("Lobby not found: {lobby_id}")]
    LobbyNotFound { lobby_id: String },

    #[error("Player not found: {player_id}")]
    PlayerNotFound { player_id: String },

    #[error("Worker not found: {worker_id}")]
    WorkerNotFound { worker_id: String },

    #[error("League not found: {league_id}")]
    LeagueNotFound { league_id: String },

    #[error("Invalid transition for lobby {lobby_id}: {reason}")]
    InvalidTransition { lobby_id: String, reason: String },

    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("Player {player_id} is banned from queueing until {until}")]
    QueueBanned { player_id: String, until: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("AMQP error: {message}")]
    AmqpError { message: String },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl OrchestratorError {
    /// Shorthand for lock poisoning failures
    pub fn lock(what: &str) -> Self {
        OrchestratorError::InternalError {
            message: format!("Failed to acquire {} lock", what),
        }
    }

    pub fn invalid_command(reason: impl Into<String>) -> Self {
        OrchestratorError::InvalidCommand {
            reason: reason.into(),
        }
    }
}
