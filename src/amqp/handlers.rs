//! Trigger ingress
//!
//! Consumes the trigger queue and turns each delivery into a coordinator
//! event. Deliveries are acked once enqueued; payloads that cannot be parsed
//! are logged and acked as well so the broker does not redeliver them forever.

use crate::amqp::messages::{MessageEnvelope, TriggerMessage};
use crate::coordinator::{CoordinatorHandle, Event};
use crate::error::{OrchestratorError, Result};
use crate::metrics::MetricsCollector;
use crate::results::CachedResultsFeed;
use amqprs::{
    channel::{BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, Channel, QueueDeclareArguments},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Hand a parsed trigger to the coordinator
pub fn route_trigger(message: TriggerMessage, handle: &CoordinatorHandle, results: &CachedResultsFeed) -> Result<()> {
    if let TriggerMessage::MatchResults { match_id, status } = &message {
        debug!("Results pushed for match {}", match_id);
        results.record(*match_id, status.clone())?;
        return handle.submit(Event::SweepResults);
    }

    match message.into_event() {
        Some(event) => handle.submit(event),
        None => Ok(()),
    }
}

/// Consumer bound to the trigger queue
pub struct TriggerConsumer {
    channel: Channel,
    consumer_tag: String,
    handle: CoordinatorHandle,
    results: Arc<CachedResultsFeed>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl TriggerConsumer {
    pub fn new(channel: Channel, handle: CoordinatorHandle, results: Arc<CachedResultsFeed>) -> Self {
        Self {
            channel,
            consumer_tag: format!("conductor-triggers-{}", uuid::Uuid::new_v4()),
            handle,
            results,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Declare the durable trigger queue and start consuming it
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let declare = QueueDeclareArguments::new(queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();
        self.channel
            .queue_declare(declare)
            .await
            .map_err(|e| OrchestratorError::AmqpError {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            })?;

        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);
        let delivery = TriggerDelivery {
            handle: self.handle.clone(),
            results: self.results.clone(),
            metrics: self.metrics.clone(),
        };
        self.channel
            .basic_consume(delivery, args)
            .await
            .map_err(|e| OrchestratorError::AmqpError {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Consuming triggers from queue '{}'", queue_name);
        Ok(())
    }

    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);
        self.channel
            .basic_cancel(args)
            .await
            .map_err(|e| OrchestratorError::AmqpError {
                message: format!("Failed to stop consuming: {}", e),
            })?;

        info!("Stopped consuming triggers");
        Ok(())
    }
}

struct TriggerDelivery {
    handle: CoordinatorHandle,
    results: Arc<CachedResultsFeed>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl TriggerDelivery {
    fn process(&self, content: &[u8]) -> Result<()> {
        let envelope = MessageEnvelope::<TriggerMessage>::from_bytes(content)?;
        debug!(
            "Trigger {} received via '{}'",
            envelope.correlation_id, envelope.routing_key
        );
        route_trigger(envelope.payload, &self.handle, &self.results)
    }
}

#[async_trait]
impl AsyncConsumer for TriggerDelivery {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        let outcome = self.process(&content);

        if let Err(e) = &outcome {
            let preview_len = content.len().min(100);
            error!(
                "Dropping trigger delivery {}: {} (payload starts {:?})",
                delivery_tag,
                e,
                String::from_utf8_lossy(&content[..preview_len])
            );
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_amqp_operation("consume", outcome.is_ok());
        }

        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            warn!("Failed to ack trigger delivery {}: {}", delivery_tag, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::PlayerCommand;
    use crate::results::{FeedStatus, MatchResultsFeed};

    #[tokio::test]
    async fn test_match_results_fill_feed_and_request_sweep() {
        let (handle, mut receiver) = CoordinatorHandle::channel();
        let results = CachedResultsFeed::new();

        route_trigger(
            TriggerMessage::MatchResults {
                match_id: 42,
                status: FeedStatus::Unavailable,
            },
            &handle,
            &results,
        )
        .unwrap();

        assert_eq!(results.fetch(42).await.unwrap(), FeedStatus::Unavailable);
        assert!(matches!(receiver.recv().await, Some(Event::SweepResults)));
        assert_eq!(handle.pending(), 1);
    }

    #[tokio::test]
    async fn test_player_trigger_becomes_event() {
        let (handle, mut receiver) = CoordinatorHandle::channel();
        let results = CachedResultsFeed::new();

        route_trigger(
            TriggerMessage::Player(PlayerCommand::Ready {
                player_id: "p1".to_string(),
            }),
            &handle,
            &results,
        )
        .unwrap();

        match receiver.recv().await {
            Some(Event::Player(PlayerCommand::Ready { player_id })) => assert_eq!(player_id, "p1"),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
