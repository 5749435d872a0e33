pub mod agent;
pub mod channel;
pub mod orchestrator;

#[cfg(test)]
mod tests;


pub use agent::{
    AgentConfig, AgentMetrics, AgentStats, AgentStatus, AgentSupervisor, Reply, SupervisorTiming,
    STATS_LOG_EVERY,
};
pub use channel::{ChannelKind, LoopVariant};
pub use orchestrator::{AgentOrchestrator, FleetStatus};
