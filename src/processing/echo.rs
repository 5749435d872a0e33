//! Credential-free processing unit for local runs.
//!
//! Replies with the agent's brand name followed by the inbound text, so a
//! fleet can be brought up end to end without any upstream engine.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::agents::{AgentConfig, ChannelKind};
use crate::error::{FleetError, Result};
use crate::processing::{InboundMessage, Persona, ProcessingUnit};

pub struct EchoProcessingUnit {
    agent_id: String,
    channel: ChannelKind,
    persona: RwLock<Option<Persona>>,
}

impl EchoProcessingUnit {
    pub fn new(agent_id: impl Into<String>, channel: ChannelKind) -> Self {
        Self {
            agent_id: agent_id.into(),
            channel,
            persona: RwLock::new(None),
        }
    }
}

#[async_trait]
impl ProcessingUnit for EchoProcessingUnit {
    async fn initialize(&self, config: &AgentConfig) -> Result<()> {
        let persona = Persona::from_config(&self.agent_id, &self.channel, config);
        debug!("Echo unit for agent {} speaking as {}", self.agent_id, persona.brand_name);
        *self.persona.write().await = Some(persona);
        Ok(())
    }

    async fn process_message(&self, message: &InboundMessage) -> Result<Option<String>> {
        let persona = self.persona.read().await;
        let persona = persona.as_ref().ok_or_else(|| {
            FleetError::AdapterError(format!("Echo unit for agent {} not initialized", self.agent_id))
        })?;

        let text = message.text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!("[{}] {}", persona.brand_name, text)))
    }
}
