use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use crate::agents::{AgentConfig, AgentStats, AgentStatus, AgentSupervisor, ChannelKind, Reply};
use crate::channels::ConnectorRegistry;
use crate::config::{Config, OrchestratorSettings};
use crate::error::{FleetError, Result};
use crate::processing::ProcessingUnitFactory;

/// Fleet-wide snapshot for status reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetStatus {
    pub running: bool,
    pub total_agents: usize,
    pub active_agents: usize,
    pub total_messages: u64,
    pub total_errors: u64,
    #[serde(with = "humantime_serde")]
    pub uptime: Duration,
    /// In registration order
    pub agents: Vec<AgentStats>,
}

/// A spawned run loop and the agent it belongs to
struct AgentTask {
    agent: Arc<AgentSupervisor>,
    handle: JoinHandle<()>,
}

pub struct AgentOrchestrator {
    agents: Vec<Arc<AgentSupervisor>>,
    tasks: Vec<AgentTask>,
    factory: Arc<dyn ProcessingUnitFactory>,
    connectors: ConnectorRegistry,
    settings: OrchestratorSettings,
    running: bool,
    start_time: Instant,
}

impl AgentOrchestrator {
    pub fn new(settings: OrchestratorSettings, factory: Arc<dyn ProcessingUnitFactory>) -> Self {
        Self {
            agents: Vec::new(),
            tasks: Vec::new(),
            factory,
            connectors: ConnectorRegistry::new(),
            settings,
            running: false,
            start_time: Instant::now(),
        }
    }

    pub fn with_connectors(mut self, connectors: ConnectorRegistry) -> Self {
        self.connectors = connectors;
        self
    }

    /// Build an orchestrator with every agent listed in `config` registered.
    pub fn from_config(config: &Config, factory: Arc<dyn ProcessingUnitFactory>) -> Result<Self> {
        let mut orchestrator = Self::new(config.orchestrator.clone(), factory);
        for definition in &config.agents {
            orchestrator.register(
                &definition.id,
                definition.channel.clone(),
                config.effective_agent_config(definition),
            )?;
        }
        Ok(orchestrator)
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Add an agent definition. Ids are unique for the orchestrator's lifetime.
    pub fn register(
        &mut self,
        id: &str,
        channel_kind: ChannelKind,
        config: AgentConfig,
    ) -> Result<Arc<AgentSupervisor>> {
        if self.agents.iter().any(|agent| agent.id() == id) {
            warn!("Rejected registration of duplicate agent id {}", id);
            return Err(FleetError::DuplicateAgentId(id.to_string()));
        }
        if self.running {
            return Err(FleetError::ConfigError(format!(
                "Cannot register agent {} while the fleet is running",
                id
            )));
        }

        let agent = Arc::new(AgentSupervisor::new(
            id,
            channel_kind,
            config,
            self.settings.supervisor_timing(),
        ));
        self.agents.push(agent.clone());
        info!("Added agent: {} ({})", id, agent.channel_kind());
        Ok(agent)
    }

    /// Initialize every agent concurrently and wait for all of them.
    ///
    /// One agent failing, or even panicking, never stops the others.
    /// Returns how many agents are initialized afterwards.
    pub async fn initialize_all(&self) -> usize {
        info!("Initializing {} agents...", self.agents.len());

        let attempts: Vec<_> = self
            .agents
            .iter()
            .map(|agent| {
                let agent = agent.clone();
                let factory = self.factory.clone();
                tokio::spawn(async move { agent.initialize(factory.as_ref()).await })
            })
            .collect();

        let results = join_all(attempts).await;

        let mut initialized = 0;
        for (agent, result) in self.agents.iter().zip(results) {
            match result {
                Ok(true) => initialized += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        "Initialization task for agent {} ({}) crashed: {}",
                        agent.id(),
                        agent.channel_kind(),
                        e
                    );
                    agent
                        .mark_init_failed(format!("initialization task crashed: {}", e))
                        .await;
                }
            }
        }

        info!("Initialized {}/{} agents", initialized, self.agents.len());
        initialized
    }

    /// Spawn one run loop per initialized agent.
    ///
    /// Refuses with [`FleetError::NoRunnableAgents`] when fewer than
    /// `min_runnable_agents` could run; nothing is spawned in that case.
    pub async fn start_all(&mut self) -> Result<usize> {
        if self.running {
            warn!("Fleet already running with {} tasks", self.tasks.len());
            return Ok(self.tasks.len());
        }

        let mut runnable = Vec::new();
        let mut initialized = 0;
        for agent in &self.agents {
            if agent.status().await != AgentStatus::Initialized {
                continue;
            }
            initialized += 1;
            if agent.channel_kind().is_supported() {
                runnable.push(agent.clone());
            } else {
                let skipped = FleetError::UnknownChannelKind {
                    agent_id: agent.id().to_string(),
                    kind: agent.channel_kind().to_string(),
                };
                warn!("{}, skipping", skipped);
            }
        }

        let required = self.settings.min_runnable_agents.max(1);
        if runnable.len() < required {
            error!(
                "No agents runnable ({} initialized of {}). Check credentials and channel kinds.",
                initialized,
                self.agents.len()
            );
            return Err(FleetError::NoRunnableAgents {
                registered: self.agents.len(),
                runnable: runnable.len(),
                required,
            });
        }

        self.running = true;
        for agent in runnable {
            let connector = self.connectors.get(agent.channel_kind());
            if let Some(handle) = agent.launch(connector).await {
                info!("Started {} agent: {}", agent.channel_kind(), agent.id());
                self.tasks.push(AgentTask { agent, handle });
            }
        }

        info!("{} agents running", self.tasks.len());
        Ok(self.tasks.len())
    }

    /// Signal every agent to stop and wait for their run loops.
    ///
    /// Waits at most `shutdown_timeout` in total; loops still alive after that
    /// are aborted and their agents recorded as stopped. Calling this again
    /// is a no-op.
    pub async fn stop_all(&mut self) {
        if !self.running && self.tasks.is_empty() {
            return;
        }
        info!("Stopping all agents...");
        self.running = false;

        for agent in &self.agents {
            agent.stop();
        }

        let deadline = Instant::now() + self.settings.shutdown_timeout;
        for AgentTask { agent, mut handle } in self.tasks.drain(..) {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        "Run loop for agent {} ({}) ended abnormally: {}",
                        agent.id(),
                        agent.channel_kind(),
                        e
                    );
                    agent.force_stopped(&format!("run loop ended abnormally: {}", e)).await;
                }
                Err(_) => {
                    handle.abort();
                    warn!(
                        "Agent {} ({}) did not stop within {:?}, abandoning its task",
                        agent.id(),
                        agent.channel_kind(),
                        self.settings.shutdown_timeout
                    );
                    agent.force_stopped("abandoned after shutdown timeout").await;
                }
            }
        }

        info!("All agents stopped");
    }

    /// Route one message to an agent.
    pub async fn dispatch(
        &self,
        agent_id: &str,
        text: &str,
        contact_id: &str,
        conversation_id: &str,
    ) -> Result<Reply> {
        let agent = self
            .agent(agent_id)
            .ok_or_else(|| FleetError::AgentNotFound(agent_id.to_string()))?;
        Ok(agent.process_message(text, contact_id, conversation_id).await)
    }

    pub fn agent(&self, agent_id: &str) -> Option<Arc<AgentSupervisor>> {
        self.agents.iter().find(|agent| agent.id() == agent_id).cloned()
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.iter().map(|agent| agent.id().to_string()).collect()
    }

    pub async fn agent_stats(&self, agent_id: &str) -> Option<AgentStats> {
        match self.agent(agent_id) {
            Some(agent) => Some(agent.stats().await),
            None => None,
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Snapshot of the fleet; agents appear in registration order.
    pub async fn get_status(&self) -> FleetStatus {
        let mut agents = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            agents.push(agent.stats().await);
        }

        FleetStatus {
            running: self.running,
            total_agents: agents.len(),
            active_agents: agents.iter().filter(|stats| stats.running).count(),
            total_messages: agents.iter().map(|stats| stats.message_count).sum(),
            total_errors: agents.iter().map(|stats| stats.error_count).sum(),
            uptime: self.start_time.elapsed(),
            agents,
        }
    }
}
