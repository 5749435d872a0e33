use thiserror::Error;

pub type Result<T> = std::result::Result<T, FleetError>;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Adapter error: {0}")]
    AdapterError(String),

    #[error("Unknown channel kind '{kind}' for agent {agent_id}")]
    UnknownChannelKind { agent_id: String, kind: String },

    #[error("Agent id '{0}' is already registered")]
    DuplicateAgentId(String),

    #[error("No runnable agents: {runnable}/{registered} can run, at least {required} required")]
    NoRunnableAgents {
        registered: usize,
        runnable: usize,
        required: usize,
    },

    #[error("Agent {0} not found")]
    AgentNotFound(String),

    #[error("Connector error: {0}")]
    ConnectorError(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

/// How far a failure is allowed to travel from where it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// The single call is refused, nothing else changes.
    RejectCall,
    /// The agent is parked as inactive for the rest of the orchestrator's life.
    DisableAgent,
    /// The agent is not started.
    SkipAgent,
    LogAndContinue,
    /// The process cannot do useful work and should exit.
    Abort,
}

impl FleetError {
    pub fn escalation(&self) -> Escalation {
        match self {
            FleetError::ConfigError(_) => Escalation::DisableAgent,
            FleetError::AdapterError(_) => Escalation::LogAndContinue,
            FleetError::UnknownChannelKind { .. } => Escalation::SkipAgent,
            FleetError::DuplicateAgentId(_) => Escalation::RejectCall,
            FleetError::NoRunnableAgents { .. } => Escalation::Abort,
            FleetError::AgentNotFound(_) => Escalation::RejectCall,
            FleetError::ConnectorError(_) => Escalation::SkipAgent,
            FleetError::NetworkError(_) => Escalation::LogAndContinue,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.escalation() == Escalation::Abort
    }
}

// Conversion implementations for common error types
impl From<std::io::Error> for FleetError {
    fn from(err: std::io::Error) -> Self {
        FleetError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::AdapterError(err.to_string())
    }
}

impl From<toml::de::Error> for FleetError {
    fn from(err: toml::de::Error) -> Self {
        FleetError::ConfigError(err.to_string())
    }
}

impl From<toml::ser::Error> for FleetError {
    fn from(err: toml::ser::Error) -> Self {
        FleetError::ConfigError(err.to_string())
    }
}

impl From<config::ConfigError> for FleetError {
    fn from(err: config::ConfigError) -> Self {
        FleetError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for FleetError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            FleetError::NetworkError(err.to_string())
        } else {
            FleetError::AdapterError(err.to_string())
        }
    }
}
