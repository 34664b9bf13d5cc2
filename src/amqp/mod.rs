//! AMQP integration
//!
//! This module handles the broker connection, trigger ingress, the chat
//! gateway publisher and the remote game-host client.

pub mod connection;
pub mod handlers;
pub mod host_client;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{route_trigger, TriggerConsumer};
pub use host_client::{RemoteGameHost, RemoteHostClient, RemoteHostFactory};
pub use messages::*;
pub use publisher::{AmqpChatGateway, PublisherConfig};
