use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info};

use crate::agents::{AgentSupervisor, Reply};
use crate::channels::ChannelConnector;
use crate::error::{FleetError, Result};

/// Message waiting in an inbox
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboxMessage {
    pub text: String,
    pub contact_id: String,
    pub conversation_id: String,
}

/// What the bound agent answered
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundReply {
    pub agent_id: String,
    pub contact_id: String,
    pub conversation_id: String,
    pub reply: Reply,
}

/// Producer half of an [`InboxConnector`]
#[derive(Debug, Clone)]
pub struct InboxSender {
    tx: mpsc::Sender<InboxMessage>,
}

impl InboxSender {
    pub async fn send(
        &self,
        text: impl Into<String>,
        contact_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Result<()> {
        let message = InboxMessage {
            text: text.into(),
            contact_id: contact_id.into(),
            conversation_id: conversation_id.into(),
        };
        self.tx
            .send(message)
            .await
            .map_err(|_| FleetError::ConnectorError("Inbox is closed".to_string()))
    }
}

/// In-process event source: queued messages are fed to the bound agent one
/// at a time, and every reply is broadcast to subscribers.
pub struct InboxConnector {
    name: String,
    inbox: Mutex<Option<mpsc::Receiver<InboxMessage>>>,
    replies: broadcast::Sender<OutboundReply>,
}

impl InboxConnector {
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, InboxSender) {
        let (tx, rx) = mpsc::channel(capacity);
        let (replies, _) = broadcast::channel(capacity.max(16));
        let connector = Self {
            name: name.into(),
            inbox: Mutex::new(Some(rx)),
            replies,
        };
        (connector, InboxSender { tx })
    }

    pub fn subscribe_replies(&self) -> broadcast::Receiver<OutboundReply> {
        self.replies.subscribe()
    }
}

#[async_trait::async_trait]
impl ChannelConnector for InboxConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn bind(&self, agent: Arc<AgentSupervisor>) -> Result<()> {
        let mut rx = self.inbox.lock().await.take().ok_or_else(|| {
            FleetError::ConnectorError(format!("Inbox {} is already bound", self.name))
        })?;
        let replies = self.replies.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            let stopped = agent.stopped();
            tokio::pin!(stopped);

            loop {
                tokio::select! {
                    _ = &mut stopped => {
                        debug!("Inbox {} pump for agent {} received stop", name, agent.id());
                        break;
                    }
                    message = rx.recv() => {
                        let Some(message) = message else {
                            debug!("Inbox {} closed by all senders", name);
                            break;
                        };
                        let reply = agent
                            .process_message(&message.text, &message.contact_id, &message.conversation_id)
                            .await;
                        // No subscribers is fine; the reply is still counted on the agent
                        let _ = replies.send(OutboundReply {
                            agent_id: agent.id().to_string(),
                            contact_id: message.contact_id,
                            conversation_id: message.conversation_id,
                            reply,
                        });
                    }
                }
            }

            info!("Inbox {} detached from agent {}", name, agent.id());
        });

        Ok(())
    }
}
