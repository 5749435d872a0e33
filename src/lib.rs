pub mod agents;
pub mod api;
pub mod channels;
pub mod config;
pub mod error;
pub mod processing;

pub use error::{FleetError, Result};
pub use config::Config;
pub use agents::AgentOrchestrator;
