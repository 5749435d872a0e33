pub mod echo;
pub mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::agents::{AgentConfig, ChannelKind};
use crate::config::{ProcessingBackend, ProcessingConfig};
use crate::error::{FleetError, Result};

pub use echo::EchoProcessingUnit;
pub use webhook::WebhookProcessingUnit;

/// One inbound message handed to a processing unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    pub id: Uuid,
    pub text: String,
    pub contact_id: String,
    pub conversation_id: String,
    pub channel: ChannelKind,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        text: impl Into<String>,
        contact_id: impl Into<String>,
        conversation_id: impl Into<String>,
        channel: ChannelKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            contact_id: contact_id.into(),
            conversation_id: conversation_id.into(),
            channel,
            received_at: Utc::now(),
        }
    }
}

/// The conversational engine behind an agent.
///
/// `process_message` answers with `Ok(Some(text))`, declines to answer with
/// `Ok(None)`, and reports failures as `Err`; callers never need to inspect
/// the concrete engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessingUnit: Send + Sync {
    async fn initialize(&self, config: &AgentConfig) -> Result<()>;
    async fn process_message(&self, message: &InboundMessage) -> Result<Option<String>>;
}

/// Builds a fresh, uninitialized unit for one agent.
pub trait ProcessingUnitFactory: Send + Sync {
    fn create(&self, agent_id: &str, channel: &ChannelKind) -> Result<Arc<dyn ProcessingUnit>>;
}

/// Brand voice an agent speaks with, read from its config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Persona {
    pub brand_name: String,
    pub brand_voice: String,
    pub personality: String,
}

impl Persona {
    pub fn from_config(agent_id: &str, channel: &ChannelKind, config: &AgentConfig) -> Self {
        Self {
            brand_name: config_str(config, "brand_name")
                .unwrap_or("Aria")
                .to_string(),
            brand_voice: config_str(config, "brand_voice")
                .unwrap_or("Professional, friendly, knowledgeable")
                .to_string(),
            personality: config_str(config, "brand_personality")
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!("I'm agent {}, handling the {} channel.", agent_id, channel)
                }),
        }
    }
}

/// Non-blank string value for `key`, if any.
pub fn config_str<'a>(config: &'a AgentConfig, key: &str) -> Option<&'a str> {
    match config.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
        _ => None,
    }
}

/// Picks the processing backend named in configuration.
pub struct BackendFactory {
    backend: ProcessingBackend,
    client: reqwest::Client,
}

impl BackendFactory {
    pub fn new(config: &ProcessingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FleetError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            backend: config.backend,
            client,
        })
    }

    pub fn backend(&self) -> ProcessingBackend {
        self.backend
    }
}

impl ProcessingUnitFactory for BackendFactory {
    fn create(&self, agent_id: &str, channel: &ChannelKind) -> Result<Arc<dyn ProcessingUnit>> {
        let unit: Arc<dyn ProcessingUnit> = match self.backend {
            ProcessingBackend::Echo => Arc::new(EchoProcessingUnit::new(agent_id, channel.clone())),
            ProcessingBackend::Webhook => Arc::new(WebhookProcessingUnit::new(
                agent_id,
                channel.clone(),
                self.client.clone(),
            )),
        };
        Ok(unit)
    }
}
