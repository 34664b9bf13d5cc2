//! Remote game host
//!
//! `RemoteGameHost` implements `GameHost` by request and reply over AMQP.
//! Requests go to the host exchange with routing key `host.<worker_id>`;
//! the host agent answers on this process's exclusive reply queue, echoing
//! the request's correlation id.

use crate::amqp::messages::{host_routing_key, HostCall, HostReply, HostRequest, MessageEnvelope};
use crate::error::{OrchestratorError, Result};
use crate::types::{AccountId, ExternalLobbyId, WorkerId, WorkerRecord};
use crate::worker::{GameHost, GameHostFactory, HostLobbyOptions, TeamSnapshot};
use amqprs::{
    channel::{
        BasicAckArguments, BasicConsumeArguments, BasicPublishArguments, Channel, ExchangeDeclareArguments,
        QueueDeclareArguments,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<HostReply>>>>;

/// Hand a reply to the caller waiting on its correlation id.
/// Returns false when nobody is waiting (late or unknown reply).
fn deliver_reply(pending: &PendingReplies, correlation_id: &str, content: &[u8]) -> Result<bool> {
    let reply: HostReply = serde_json::from_slice(content).map_err(|e| OrchestratorError::SerializationError {
        message: format!("Invalid host reply: {}", e),
    })?;
    let waiter = pending
        .lock()
        .map_err(|_| OrchestratorError::lock("host replies"))?
        .remove(correlation_id);
    Ok(match waiter {
        Some(waiter) => waiter.send(reply).is_ok(),
        None => false,
    })
}

/// Shared request/reply plumbing for every remote host
pub struct RemoteHostClient {
    channel: Channel,
    exchange: String,
    reply_queue: String,
    pending: PendingReplies,
    timeout: Duration,
}

impl RemoteHostClient {
    /// Declare the host exchange and an exclusive reply queue, and start
    /// listening for replies
    pub async fn connect(channel: Channel, exchange: &str, timeout: Duration) -> Result<Arc<Self>> {
        let args = ExchangeDeclareArguments::new(exchange, "topic").durable(true).finish();
        channel
            .exchange_declare(args)
            .await
            .map_err(|e| OrchestratorError::AmqpError {
                message: format!("Failed to declare host exchange {}: {}", exchange, e),
            })?;

        let reply_queue = format!("conductor.host_replies.{}", uuid::Uuid::new_v4());
        let declare = QueueDeclareArguments::new(&reply_queue)
            .exclusive(true)
            .auto_delete(true)
            .finish();
        channel
            .queue_declare(declare)
            .await
            .map_err(|e| OrchestratorError::AmqpError {
                message: format!("Failed to declare reply queue: {}", e),
            })?;

        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let consumer_tag = format!("conductor-host-replies-{}", uuid::Uuid::new_v4());
        channel
            .basic_consume(
                ReplyConsumer {
                    pending: pending.clone(),
                },
                BasicConsumeArguments::new(&reply_queue, &consumer_tag),
            )
            .await
            .map_err(|e| OrchestratorError::AmqpError {
                message: format!("Failed to consume reply queue: {}", e),
            })?;

        info!("Host replies arrive on '{}'", reply_queue);
        Ok(Arc::new(Self {
            channel,
            exchange: exchange.to_string(),
            reply_queue,
            pending,
            timeout,
        }))
    }

    pub async fn call(&self, worker_id: &str, call: HostCall) -> Result<HostReply> {
        let envelope = MessageEnvelope::new(
            HostRequest {
                worker_id: worker_id.to_string(),
                call,
            },
            host_routing_key(worker_id),
        );
        let correlation_id = envelope.correlation_id.clone();
        let payload = envelope.to_bytes()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| OrchestratorError::lock("host replies"))?
            .insert(correlation_id.clone(), reply_tx);

        let args = BasicPublishArguments::new(&self.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_correlation_id(&correlation_id)
            .with_reply_to(&self.reply_queue)
            .with_content_type("application/json");

        if let Err(e) = self.channel.basic_publish(properties, payload, args).await {
            self.forget(&correlation_id);
            return Err(OrchestratorError::AmqpError {
                message: format!("Failed to send host request to {}: {}", worker_id, e),
            }
            .into());
        }
        debug!("Sent {:?} to {} ({})", envelope.payload.call, worker_id, correlation_id);

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(OrchestratorError::WorkerUnavailable {
                worker_id: worker_id.to_string(),
            }
            .into()),
            Err(_) => {
                self.forget(&correlation_id);
                Err(OrchestratorError::WorkerProvisioningFailure {
                    worker_id: worker_id.to_string(),
                    reason: format!("no reply within {:?}", self.timeout),
                }
                .into())
            }
        }
    }

    fn forget(&self, correlation_id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(correlation_id);
        }
    }
}

struct ReplyConsumer {
    pending: PendingReplies,
}

#[async_trait]
impl AsyncConsumer for ReplyConsumer {
    async fn consume(&mut self, channel: &Channel, deliver: Deliver, basic_properties: BasicProperties, content: Vec<u8>) {
        match basic_properties.correlation_id() {
            Some(correlation_id) => match deliver_reply(&self.pending, correlation_id, &content) {
                Ok(true) => {}
                Ok(false) => debug!("No caller waiting for host reply {}", correlation_id),
                Err(e) => warn!("Dropping host reply {}: {}", correlation_id, e),
            },
            None => warn!("Host reply without correlation id dropped"),
        }

        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(deliver.delivery_tag(), false))
            .await
        {
            warn!("Failed to ack host reply: {}", e);
        }
    }
}

fn reply_error(worker_id: &str, reply: HostReply) -> anyhow::Error {
    let reason = match reply {
        HostReply::Failed { reason } => reason,
        other => format!("unexpected reply {:?}", other),
    };
    OrchestratorError::WorkerProvisioningFailure {
        worker_id: worker_id.to_string(),
        reason,
    }
    .into()
}

/// `GameHost` for a worker whose host agent runs elsewhere
pub struct RemoteGameHost {
    worker_id: WorkerId,
    client: Arc<RemoteHostClient>,
}

impl RemoteGameHost {
    pub fn new(worker_id: impl Into<WorkerId>, client: Arc<RemoteHostClient>) -> Self {
        Self {
            worker_id: worker_id.into(),
            client,
        }
    }

    async fn expect_done(&self, call: HostCall) -> Result<()> {
        match self.client.call(&self.worker_id, call).await? {
            HostReply::Done => Ok(()),
            other => Err(reply_error(&self.worker_id, other)),
        }
    }
}

#[async_trait]
impl GameHost for RemoteGameHost {
    async fn connect(&self) -> Result<()> {
        self.expect_done(HostCall::Connect).await
    }

    async fn disconnect(&self) -> Result<()> {
        self.expect_done(HostCall::Disconnect).await
    }

    async fn create_lobby(&self, options: &HostLobbyOptions) -> Result<ExternalLobbyId> {
        let call = HostCall::CreateLobby {
            options: options.clone(),
        };
        match self.client.call(&self.worker_id, call).await? {
            HostReply::LobbyCreated { external_lobby_id } => Ok(external_lobby_id),
            other => Err(reply_error(&self.worker_id, other)),
        }
    }

    async fn join_lobby(&self, lobby_id: ExternalLobbyId, password: &str) -> Result<()> {
        self.expect_done(HostCall::JoinLobby {
            lobby_id,
            password: password.to_string(),
        })
        .await
    }

    async fn invite(&self, account_id: AccountId) -> Result<()> {
        self.expect_done(HostCall::Invite { account_id }).await
    }

    async fn team_snapshot(&self) -> Result<TeamSnapshot> {
        match self.client.call(&self.worker_id, HostCall::TeamSnapshot).await? {
            HostReply::Snapshot { snapshot } => Ok(snapshot),
            other => Err(reply_error(&self.worker_id, other)),
        }
    }

    async fn launch(&self) -> Result<()> {
        self.expect_done(HostCall::Launch).await
    }

    async fn send_chat(&self, text: &str) -> Result<()> {
        self.expect_done(HostCall::SendChat { text: text.to_string() }).await
    }

    async fn leave_lobby(&self) -> Result<()> {
        self.expect_done(HostCall::LeaveLobby).await
    }

    async fn abandon_match(&self) -> Result<()> {
        self.expect_done(HostCall::AbandonMatch).await
    }

    async fn destroy_lobby(&self) -> Result<()> {
        self.expect_done(HostCall::DestroyLobby).await
    }
}

pub struct RemoteHostFactory {
    client: Arc<RemoteHostClient>,
}

impl RemoteHostFactory {
    pub fn new(client: Arc<RemoteHostClient>) -> Self {
        Self { client }
    }
}

impl GameHostFactory for RemoteHostFactory {
    fn create(&self, worker: &WorkerRecord) -> Arc<dyn GameHost> {
        Arc::new(RemoteGameHost::new(worker.id.clone(), self.client.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reply_reaches_waiting_caller() {
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let (reply_tx, reply_rx) = oneshot::channel();
        pending.lock().unwrap().insert("c-1".to_string(), reply_tx);

        let body = serde_json::to_vec(&HostReply::LobbyCreated { external_lobby_id: 99 }).unwrap();
        assert!(deliver_reply(&pending, "c-1", &body).unwrap());
        assert_eq!(reply_rx.await.unwrap(), HostReply::LobbyCreated { external_lobby_id: 99 });

        // A second copy finds nobody waiting
        assert!(!deliver_reply(&pending, "c-1", &body).unwrap());
    }

    #[test]
    fn test_malformed_reply_is_an_error() {
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        assert!(deliver_reply(&pending, "c-1", b"{\"result\":\"Exploded\"}").is_err());
    }

    #[test]
    fn test_failed_reply_keeps_reason() {
        let error = reply_error(
            "bot-3",
            HostReply::Failed {
                reason: "ticket rejected".to_string(),
            },
        );
        let message = error.to_string();
        assert!(message.contains("bot-3"));
        assert!(message.contains("ticket rejected"));
    }
}
