pub mod inbox;

use std::collections::HashMap;
use std::sync::Arc;

use crate::agents::{AgentSupervisor, ChannelKind};
use crate::error::Result;

pub use inbox::{InboxConnector, InboxSender, OutboundReply};

/// A channel integration an agent is attached to when its run loop starts.
///
/// `bind` is called once per run; whatever the connector receives afterwards
/// goes through [`AgentSupervisor::process_message`] so it is counted.
#[async_trait::async_trait]
pub trait ChannelConnector: Send + Sync {
    fn name(&self) -> &str;
    async fn bind(&self, agent: Arc<AgentSupervisor>) -> Result<()>;
}

/// Connectors by channel kind. A kind without one runs unattached.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<ChannelKind, Arc<dyn ChannelConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    pub fn add_connector(&mut self, kind: ChannelKind, connector: Arc<dyn ChannelConnector>) {
        if let Some(previous) = self.connectors.insert(kind.clone(), connector) {
            tracing::warn!("Replacing {} connector {}", kind, previous.name());
        }
    }

    pub fn get(&self, kind: &ChannelKind) -> Option<Arc<dyn ChannelConnector>> {
        self.connectors.get(kind).cloned()
    }
}
