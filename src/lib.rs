//! In-house conductor - lobby lifecycle orchestration
//!
//! This crate runs community "in-house" matches end to end: queue admission,
//! ready checks, captain selection and drafting or auto-balancing, game-host
//! worker scheduling, result collection and rating updates. Inputs arrive as
//! AMQP triggers and are serialized through a single coordinator queue.

pub mod amqp;
pub mod chat;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lobby;
pub mod matchmaking;
pub mod metrics;
pub mod rating;
pub mod results;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;
pub mod worker;

// Re-export commonly used types and traits
pub use error::{OrchestratorError, Result};
pub use types::*;

// Re-export key components
pub use chat::ChatGateway;
pub use coordinator::{Coordinator, CoordinatorHandle, Event};
pub use lobby::{LobbyMachine, LobbyState};
pub use store::{InMemoryStore, Store};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
