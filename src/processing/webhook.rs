use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::agents::{AgentConfig, ChannelKind};
use crate::error::{FleetError, Result};
use crate::processing::{config_str, InboundMessage, Persona, ProcessingUnit};

const PLACEHOLDER_KEY_PREFIX: &str = "sk-ant-api03-placeholder";

/// Where and how to reach the upstream engine
#[derive(Debug, Clone)]
struct WebhookTarget {
    endpoint: String,
    api_key: String,
    persona: Persona,
}

/// Body the upstream engine answers with
#[derive(Debug, Deserialize)]
struct EngineResponse {
    response_text: Option<String>,
}

/// Forwards every message to an HTTP engine endpoint.
pub struct WebhookProcessingUnit {
    agent_id: String,
    channel: ChannelKind,
    client: Client,
    target: RwLock<Option<WebhookTarget>>,
}

impl WebhookProcessingUnit {
    pub fn new(agent_id: impl Into<String>, channel: ChannelKind, client: Client) -> Self {
        Self {
            agent_id: agent_id.into(),
            channel,
            client,
            target: RwLock::new(None),
        }
    }

    fn validate_target(&self, config: &AgentConfig) -> Result<WebhookTarget> {
        let endpoint = config_str(config, "endpoint").ok_or_else(|| {
            FleetError::ConfigError(format!("Agent {} has no processing endpoint", self.agent_id))
        })?;
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(FleetError::ConfigError(format!(
                "Agent {} endpoint '{}' must start with http:// or https://",
                self.agent_id, endpoint
            )));
        }

        let api_key = config_str(config, "api_key").ok_or_else(|| {
            FleetError::ConfigError(format!("Agent {} - API key not configured", self.agent_id))
        })?;
        if is_placeholder_key(api_key) {
            return Err(FleetError::ConfigError(format!(
                "Agent {} - API key is a placeholder",
                self.agent_id
            )));
        }

        Ok(WebhookTarget {
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            persona: Persona::from_config(&self.agent_id, &self.channel, config),
        })
    }

    fn create_payload(&self, message: &InboundMessage, persona: &Persona) -> Value {
        json!({
            "agent_id": self.agent_id,
            "channel": message.channel,
            "message_id": message.id,
            "message": message.text,
            "contact_id": message.contact_id,
            "conversation_id": message.conversation_id,
            "received_at": message.received_at.to_rfc3339(),
            "persona": persona,
        })
    }
}

fn is_placeholder_key(key: &str) -> bool {
    key == "placeholder" || key.starts_with(PLACEHOLDER_KEY_PREFIX)
}

#[async_trait]
impl ProcessingUnit for WebhookProcessingUnit {
    async fn initialize(&self, config: &AgentConfig) -> Result<()> {
        let target = self.validate_target(config)?;
        debug!(
            "Webhook unit for agent {} ({}) targets {}",
            self.agent_id, self.channel, target.endpoint
        );
        *self.target.write().await = Some(target);
        Ok(())
    }

    async fn process_message(&self, message: &InboundMessage) -> Result<Option<String>> {
        let target = self.target.read().await.clone().ok_or_else(|| {
            FleetError::AdapterError(format!("Webhook unit for agent {} not initialized", self.agent_id))
        })?;

        let payload = self.create_payload(message, &target.persona);
        let response = self
            .client
            .post(&target.endpoint)
            .bearer_auth(&target.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Engine rejected message {} for agent {} with status {}",
                message.id, self.agent_id, status
            );
            return Err(FleetError::AdapterError(format!(
                "Engine responded with status {}: {}",
                status, body
            )));
        }

        let engine_response: EngineResponse = response.json().await?;
        Ok(engine_response
            .response_text
            .filter(|text| !text.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unit() -> WebhookProcessingUnit {
        WebhookProcessingUnit::new("slack-1", ChannelKind::ChatEvents, Client::new())
    }

    fn config(endpoint: &str, api_key: &str) -> AgentConfig {
        let mut config = AgentConfig::new();
        config.insert("endpoint".into(), json!(endpoint));
        config.insert("api_key".into(), json!(api_key));
        config
    }

    #[tokio::test]
    async fn test_initialize_accepts_valid_credentials() {
        let unit = unit();
        let result = unit
            .initialize(&config("https://engine.local/process", "sk-live-123"))
            .await;
        assert!(result.is_ok());
        assert!(unit.target.read().await.is_some());
    }

    #[tokio::test]
    async fn test_initialize_rejects_missing_key() {
        let unit = unit();
        let mut config = config("https://engine.local/process", "x");
        config.remove("api_key");

        let err = unit.initialize(&config).await.unwrap_err();
        assert!(matches!(err, FleetError::ConfigError(_)));
        assert!(err.to_string().contains("API key not configured"));
    }

    #[tokio::test]
    async fn test_initialize_rejects_placeholder_keys() {
        for key in ["placeholder", "sk-ant-REDACTED"] {
            let err = unit()
                .initialize(&config("https://engine.local", key))
                .await
                .unwrap_err();
            assert!(err.to_string().contains("placeholder"), "key {}", key);
        }
    }

    #[tokio::test]
    async fn test_initialize_rejects_non_http_endpoint() {
        let err = unit()
            .initialize(&config("ftp://engine.local", "sk-live-123"))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_process_before_initialize_is_adapter_error() {
        let message = InboundMessage::new("hi", "c", "conv", ChannelKind::ChatEvents);
        let err = unit().process_message(&message).await.unwrap_err();
        assert!(matches!(err, FleetError::AdapterError(_)));
    }

    #[test]
    fn test_payload_carries_routing_fields() {
        let unit = unit();
        let message = InboundMessage::new("hello", "contact-9", "conv-3", ChannelKind::ChatEvents);
        let persona = Persona::from_config("slack-1", &ChannelKind::ChatEvents, &AgentConfig::new());
        let payload = unit.create_payload(&message, &persona);

        assert_eq!(payload["channel"], "chat-events");
        assert_eq!(payload["contact_id"], "contact-9");
        assert_eq!(payload["conversation_id"], "conv-3");
        assert_eq!(payload["persona"]["brand_name"], "Aria");
    }
}
