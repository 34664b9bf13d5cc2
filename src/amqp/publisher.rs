//! Chat gateway over AMQP
//!
//! Every chat operation becomes a `ChatCommand` published to the chat topic
//! exchange, where the chat bridge picks it up. Room ids are minted here, so
//! `ensure_room` never needs a reply. Member lookups are answered from the
//! store's player records.

use crate::amqp::messages::{ChatCommand, MessageEnvelope};
use crate::chat::{ChatGateway, ChatTarget, MemberQuery, Notification};
use crate::error::{OrchestratorError, Result};
use crate::metrics::MetricsCollector;
use crate::store::Store;
use crate::types::{LeagueId, PlayerId};
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Configuration for chat command publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: "conductor.chat".to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// Parse a chat mention such as `<@1234>` or `<@!1234>`
pub fn mention_id(mention: &str) -> Option<&str> {
    let inner = mention.strip_prefix("<@")?.strip_suffix('>')?;
    let inner = inner.strip_prefix('!').unwrap_or(inner);
    (!inner.is_empty()).then_some(inner)
}

pub struct AmqpChatGateway {
    channel: Channel,
    config: PublisherConfig,
    store: Arc<dyn Store>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl AmqpChatGateway {
    /// Create the gateway and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig, store: Arc<dyn Store>) -> Result<Self> {
        let args = ExchangeDeclareArguments::new(&config.exchange, "topic")
            .durable(true)
            .finish();
        channel
            .exchange_declare(args)
            .await
            .map_err(|e| OrchestratorError::AmqpError {
                message: format!("Failed to declare chat exchange {}: {}", config.exchange, e),
            })?;

        Ok(Self {
            channel,
            config,
            store,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn publish(&self, command: ChatCommand) -> Result<()> {
        let routing_key = command.routing_key();
        let envelope = MessageEnvelope::new(command, routing_key);
        let payload = envelope.to_bytes()?;

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);
        loop {
            match self.try_publish(routing_key, &envelope.correlation_id, payload.clone()).await {
                Ok(()) => {
                    debug!("Published {} ({})", routing_key, envelope.correlation_id);
                    self.record("publish", true);
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish {} after {} retries: {}",
                            routing_key, self.config.max_retries, e
                        );
                        self.record("publish", false);
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} for {} failed: {}. Retrying in {:?}",
                        retry_count, routing_key, e, delay
                    );
                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    async fn try_publish(&self, routing_key: &str, message_id: &str, payload: Vec<u8>) -> Result<()> {
        let args = BasicPublishArguments::new(&self.config.exchange, routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(message_id)
            .with_content_type("application/json")
            .with_persistence(true);

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| {
                OrchestratorError::AmqpError {
                    message: format!("Failed to publish message: {}", e),
                }
                .into()
            })
    }

    fn record(&self, operation: &str, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_amqp_operation(operation, success);
        }
    }
}

#[async_trait]
impl ChatGateway for AmqpChatGateway {
    async fn post(&self, target: ChatTarget, notification: Notification) -> Result<()> {
        self.publish(ChatCommand::Post { target, notification }).await
    }

    async fn resolve_member(&self, league_id: LeagueId, query: MemberQuery) -> Result<Option<PlayerId>> {
        let player = match &query {
            MemberQuery::Id(id) => self.store.get_player(id).await?,
            MemberQuery::Mention(mention) => match mention_id(mention) {
                Some(id) => self.store.get_player(id).await?,
                None => None,
            },
            MemberQuery::Nickname(nickname) => self.store.find_player_by_nickname(league_id, nickname).await?,
        };
        Ok(player.map(|player| player.id))
    }

    async fn ensure_room(&self, category: &str, name: &str) -> Result<String> {
        let room = format!("room-{}", uuid::Uuid::new_v4());
        self.publish(ChatCommand::EnsureRoom {
            room: room.clone(),
            category: category.to_string(),
            name: name.to_string(),
        })
        .await?;
        Ok(room)
    }

    async fn set_room_access(&self, room: &str, members: &[PlayerId], visible: bool) -> Result<()> {
        self.publish(ChatCommand::SetRoomAccess {
            room: room.to_string(),
            members: members.to_vec(),
            visible,
        })
        .await
    }

    async fn rename_room(&self, room: &str, name: &str) -> Result<()> {
        self.publish(ChatCommand::RenameRoom {
            room: room.to_string(),
            name: name.to_string(),
        })
        .await
    }

    async fn remove_room(&self, room: &str) -> Result<()> {
        self.publish(ChatCommand::RemoveRoom { room: room.to_string() }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_config_default() {
        let config = PublisherConfig::default();
        assert_eq!(config.exchange, "conductor.chat");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_mention_parsing() {
        assert_eq!(mention_id("<@1234>"), Some("1234"));
        assert_eq!(mention_id("<@!1234>"), Some("1234"));
        assert_eq!(mention_id("<@>"), None);
        assert_eq!(mention_id("1234"), None);
    }
}
