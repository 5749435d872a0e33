use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::agents::channel::{ChannelKind, LoopVariant};
use crate::channels::ChannelConnector;
use crate::error::{FleetError, Result};
use crate::processing::{InboundMessage, ProcessingUnit, ProcessingUnitFactory};

/// Opaque per-agent settings handed to the processing unit
pub type AgentConfig = BTreeMap<String, serde_json::Value>;

/// The event-driven heartbeat logs stats each time this many more messages were handled
pub const STATS_LOG_EVERY: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AgentStatus {
    Unconfigured,
    Initializing,
    Initialized,
    InitFailed(String),
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub status: AgentStatus,
    pub message_count: u64,
    pub error_count: u64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self {
            status: AgentStatus::Unconfigured,
            message_count: 0,
            error_count: 0,
            last_message_at: None,
            last_tick_at: None,
            started_at: None,
            last_error: None,
        }
    }
}

/// Point-in-time view of one agent, as reported in fleet status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentStats {
    pub id: String,
    pub channel_kind: ChannelKind,
    pub status: AgentStatus,
    pub running: bool,
    pub message_count: u64,
    pub error_count: u64,
    pub has_processing_unit: bool,
    pub last_message_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Outcome of handing a message to an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Reply {
    Text(String),
    NoResponse,
}

impl Reply {
    pub fn text(&self) -> Option<&str> {
        match self {
            Reply::Text(text) => Some(text),
            Reply::NoResponse => None,
        }
    }

    pub fn is_no_response(&self) -> bool {
        matches!(self, Reply::NoResponse)
    }
}

/// Timeouts and loop intervals a supervisor runs with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisorTiming {
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    pub init_timeout: Duration,
    pub processing_timeout: Duration,
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            poll_interval: Duration::from_secs(30),
            init_timeout: Duration::from_secs(30),
            processing_timeout: Duration::from_secs(60),
        }
    }
}

/// Everything mutable about an agent, kept under one lock so snapshots never tear
struct RecordState {
    metrics: AgentMetrics,
    unit: Option<Arc<dyn ProcessingUnit>>,
}

/// Owns one agent: its identity, its processing unit and its run loop.
///
/// Only the supervisor writes to its own state. Everyone else reads through
/// [`AgentSupervisor::stats`], which copies the whole record under one lock.
pub struct AgentSupervisor {
    id: String,
    channel_kind: ChannelKind,
    config: AgentConfig,
    timing: SupervisorTiming,
    state: RwLock<RecordState>,
    stop_signal: watch::Sender<bool>,
}

impl std::fmt::Debug for AgentSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSupervisor")
            .field("id", &self.id)
            .field("channel_kind", &self.channel_kind)
            .field("stop_requested", &self.stop_requested())
            .finish_non_exhaustive()
    }
}

/// Whether the heartbeat should log: another `STATS_LOG_EVERY` messages
/// were handled since the count last reported.
pub(crate) fn crossed_stats_threshold(last_reported: u64, count: u64) -> bool {
    count / STATS_LOG_EVERY > last_reported / STATS_LOG_EVERY
}

impl AgentSupervisor {
    pub fn new(
        id: impl Into<String>,
        channel_kind: ChannelKind,
        config: AgentConfig,
        timing: SupervisorTiming,
    ) -> Self {
        let (stop_signal, _) = watch::channel(false);
        Self {
            id: id.into(),
            channel_kind,
            config,
            timing,
            state: RwLock::new(RecordState {
                metrics: AgentMetrics::default(),
                unit: None,
            }),
            stop_signal,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel_kind(&self) -> &ChannelKind {
        &self.channel_kind
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub async fn status(&self) -> AgentStatus {
        self.state.read().await.metrics.status.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.status().await == AgentStatus::Running
    }

    pub async fn metrics(&self) -> AgentMetrics {
        self.state.read().await.metrics.clone()
    }

    pub async fn stats(&self) -> AgentStats {
        let state = self.state.read().await;
        let metrics = &state.metrics;
        AgentStats {
            id: self.id.clone(),
            channel_kind: self.channel_kind.clone(),
            status: metrics.status.clone(),
            running: metrics.status == AgentStatus::Running,
            message_count: metrics.message_count,
            error_count: metrics.error_count,
            has_processing_unit: state.unit.is_some(),
            last_message_at: metrics.last_message_at,
            started_at: metrics.started_at,
            last_error: metrics.last_error.clone(),
        }
    }

    async fn set_status(&self, status: AgentStatus) {
        let mut state = self.state.write().await;
        state.metrics.status = status;
    }

    /// Create and initialize the processing unit.
    ///
    /// Returns whether the agent ended up `Initialized`. Failures park the
    /// agent in `InitFailed`; nothing retries them.
    pub async fn initialize(&self, factory: &dyn ProcessingUnitFactory) -> bool {
        {
            let mut state = self.state.write().await;
            let status = state.metrics.status.clone();
            if status != AgentStatus::Unconfigured {
                debug!(
                    "Agent {} ({}) already past initialization: {:?}",
                    self.id, self.channel_kind, status
                );
                return status == AgentStatus::Initialized;
            }
            state.metrics.status = AgentStatus::Initializing;
        }

        info!("Initializing agent {} ({})", self.id, self.channel_kind);

        match self.create_unit(factory).await {
            Ok(unit) => {
                let mut state = self.state.write().await;
                state.unit = Some(unit);
                state.metrics.status = AgentStatus::Initialized;
                info!("Agent {} ({}) initialized", self.id, self.channel_kind);
                true
            }
            Err(e) => {
                error!(
                    "Failed to initialize agent {} ({}): {}",
                    self.id, self.channel_kind, e
                );
                self.mark_init_failed(e.to_string()).await;
                false
            }
        }
    }

    async fn create_unit(&self, factory: &dyn ProcessingUnitFactory) -> Result<Arc<dyn ProcessingUnit>> {
        let unit = factory.create(&self.id, &self.channel_kind)?;
        match timeout(self.timing.init_timeout, unit.initialize(&self.config)).await {
            Ok(Ok(())) => Ok(unit),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(FleetError::ConfigError(format!(
                "initialize timed out after {:?}",
                self.timing.init_timeout
            ))),
        }
    }

    /// Park the agent as failed without touching its unit slot.
    pub async fn mark_init_failed(&self, reason: String) {
        let mut state = self.state.write().await;
        state.metrics.last_error = Some(reason.clone());
        state.metrics.status = AgentStatus::InitFailed(reason);
    }

    /// Hand one message to the processing unit.
    ///
    /// Never fails: adapter errors and timeouts are counted and come back as
    /// [`Reply::NoResponse`].
    pub async fn process_message(&self, text: &str, contact_id: &str, conversation_id: &str) -> Reply {
        let unit = {
            let state = self.state.read().await;
            if state.metrics.status != AgentStatus::Running {
                warn!(
                    "Agent {} ({}) is not running ({:?}), dropping message from {}",
                    self.id, self.channel_kind, state.metrics.status, contact_id
                );
                return Reply::NoResponse;
            }
            state.unit.clone()
        };
        let Some(unit) = unit else {
            warn!("Agent {} is running without a processing unit", self.id);
            return Reply::NoResponse;
        };

        let message = InboundMessage::new(text, contact_id, conversation_id, self.channel_kind.clone());
        let outcome = match timeout(self.timing.processing_timeout, unit.process_message(&message)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(FleetError::AdapterError(format!(
                "processing timed out after {:?}",
                self.timing.processing_timeout
            ))),
        };

        let mut state = self.state.write().await;
        match outcome {
            Ok(response) => {
                state.metrics.message_count += 1;
                state.metrics.last_message_at = Some(Utc::now());
                match response {
                    Some(text) => Reply::Text(text),
                    None => Reply::NoResponse,
                }
            }
            Err(e) => {
                state.metrics.error_count += 1;
                state.metrics.last_error = Some(e.to_string());
                error!(
                    "Agent {} ({}) error processing message {} for conversation {}: {}",
                    self.id, self.channel_kind, message.id, conversation_id, e
                );
                Reply::NoResponse
            }
        }
    }

    /// Move an `Initialized` agent to `Running` and spawn its channel loop.
    ///
    /// Returns `None` (and spawns nothing) when the agent is in any other
    /// state or its channel kind has no loop. The agent is already `Running`
    /// when this returns, so status reads right after a launch are exact.
    pub async fn launch(
        self: &Arc<Self>,
        connector: Option<Arc<dyn ChannelConnector>>,
    ) -> Option<JoinHandle<()>> {
        let Some(variant) = self.channel_kind.loop_variant() else {
            warn!(
                "Agent {} has unknown channel kind '{}', not running",
                self.id, self.channel_kind
            );
            return None;
        };

        let stop_rx = self.stop_signal.subscribe();
        {
            let mut state = self.state.write().await;
            if state.metrics.status != AgentStatus::Initialized {
                warn!(
                    "Agent {} ({}) cannot run from {:?}",
                    self.id, self.channel_kind, state.metrics.status
                );
                return None;
            }
            if *stop_rx.borrow() {
                state.metrics.status = AgentStatus::Stopped;
                info!("Agent {} stopped before its loop started", self.id);
                return None;
            }
            state.metrics.status = AgentStatus::Running;
            state.metrics.started_at = Some(Utc::now());
        }
        info!("Starting {} agent: {}", self.channel_kind, self.id);

        Some(tokio::spawn(self.clone().run(variant, connector, stop_rx)))
    }

    /// The channel loop proper; exits when the stop signal is observed.
    ///
    /// A configured connector is bound exactly once on entry.
    async fn run(
        self: Arc<Self>,
        variant: LoopVariant,
        connector: Option<Arc<dyn ChannelConnector>>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        if let Some(connector) = connector {
            match connector.bind(self.clone()).await {
                Ok(()) => info!(
                    "{} agent {} connected to {}",
                    self.channel_kind,
                    self.id,
                    connector.name()
                ),
                Err(e) => {
                    error!(
                        "{} agent {} failed to bind {}: {}",
                        self.channel_kind,
                        self.id,
                        connector.name(),
                        e
                    );
                    self.state.write().await.metrics.last_error = Some(e.to_string());
                    self.finish().await;
                    return;
                }
            }
        }

        match variant {
            LoopVariant::EventDriven => self.heartbeat_loop(&mut stop_rx).await,
            LoopVariant::Polling => self.polling_loop(&mut stop_rx).await,
        }

        self.finish().await;
    }

    async fn heartbeat_loop(&self, stop_rx: &mut watch::Receiver<bool>) {
        let mut ticker = interval(self.timing.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        let mut last_reported = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => {
                    let count = self.state.read().await.metrics.message_count;
                    if crossed_stats_threshold(last_reported, count) {
                        info!("{} agent {} processed {} messages", self.channel_kind, self.id, count);
                        last_reported = count;
                    }
                }
            }
        }
    }

    async fn polling_loop(&self, stop_rx: &mut watch::Receiver<bool>) {
        let mut ticker = interval(self.timing.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => {
                    self.state.write().await.metrics.last_tick_at = Some(Utc::now());
                    debug!("{} agent {} monitoring...", self.channel_kind, self.id);
                }
            }
        }
    }

    async fn finish(&self) {
        self.set_status(AgentStatus::Stopping).await;
        debug!("Agent {} ({}) stopping", self.id, self.channel_kind);
        self.set_status(AgentStatus::Stopped).await;
        info!("Agent {} ({}) stopped", self.id, self.channel_kind);
    }

    /// Ask the run loop to exit at its next suspension point.
    pub fn stop(&self) {
        self.stop_signal.send_replace(true);
    }

    pub fn stop_requested(&self) -> bool {
        *self.stop_signal.borrow()
    }

    /// Resolves once [`AgentSupervisor::stop`] has been called.
    pub async fn stopped(&self) {
        let mut stop_rx = self.stop_signal.subscribe();
        if *stop_rx.borrow_and_update() {
            return;
        }
        let _ = stop_rx.changed().await;
    }

    /// Record that the run loop was abandoned rather than exiting on its own.
    pub async fn force_stopped(&self, reason: &str) {
        let mut state = self.state.write().await;
        state.metrics.last_error = Some(reason.to_string());
        state.metrics.status = AgentStatus::Stopped;
    }
}
