use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::agents::{AgentConfig, ChannelKind, SupervisorTiming};
use crate::error::{FleetError, Result};

/// Prefix for environment overrides, e.g. `AGENT_FLEET__MONITORING__API_PORT=9090`
pub const ENV_PREFIX: &str = "AGENT_FLEET";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub agents: Vec<AgentDefinition>,
    pub orchestrator: OrchestratorSettings,
    pub processing: ProcessingConfig,
    pub monitoring: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AgentDefinition {
    pub id: String,
    pub channel: ChannelKind,
    #[serde(default)]
    pub config: AgentConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct OrchestratorSettings {
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub init_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub processing_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Fewest initialized agents the fleet is willing to start with
    pub min_runnable_agents: usize,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingBackend {
    Echo,
    Webhook,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProcessingConfig {
    pub backend: ProcessingBackend,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Environment variable read for the key when `api_key` is unset
    pub api_key_env: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Settings every agent starts from; an agent's own config wins
    #[serde(default)]
    pub defaults: AgentConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MonitorConfig {
    #[serde(with = "humantime_serde")]
    pub status_interval: Duration,
    pub api_enabled: bool,
    pub api_port: u16,
    pub api_token: Option<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        let timing = SupervisorTiming::default();
        Self {
            heartbeat_interval: timing.heartbeat_interval,
            poll_interval: timing.poll_interval,
            init_timeout: timing.init_timeout,
            processing_timeout: timing.processing_timeout,
            shutdown_timeout: Duration::from_secs(30),
            min_runnable_agents: 1,
        }
    }
}

impl OrchestratorSettings {
    pub fn supervisor_timing(&self) -> SupervisorTiming {
        SupervisorTiming {
            heartbeat_interval: self.heartbeat_interval,
            poll_interval: self.poll_interval,
            init_timeout: self.init_timeout,
            processing_timeout: self.processing_timeout,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        let mut defaults = AgentConfig::new();
        defaults.insert("brand_name".to_string(), "Aria".into());
        defaults.insert(
            "brand_voice".to_string(),
            "Professional, energetic, knowledgeable".into(),
        );

        Self {
            backend: ProcessingBackend::Echo,
            endpoint: None,
            api_key: None,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            request_timeout: Duration::from_secs(45),
            defaults,
        }
    }
}

impl ProcessingConfig {
    /// The configured key, falling back to the `api_key_env` variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| {
                std::env::var(&self.api_key_env)
                    .ok()
                    .filter(|key| !key.trim().is_empty())
            })
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(60),
            api_enabled: false,
            api_port: 8080,
            api_token: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let agent = |id: &str, channel: ChannelKind| AgentDefinition {
            id: id.to_string(),
            channel,
            config: AgentConfig::new(),
        };

        Self {
            agents: vec![
                agent("slack-1", ChannelKind::ChatEvents),
                agent("email-1", ChannelKind::Email),
                agent("web-1", ChannelKind::WebChat),
                agent("api-1", ChannelKind::Api),
            ],
            orchestrator: OrchestratorSettings::default(),
            processing: ProcessingConfig::default(),
            monitoring: MonitorConfig::default(),
        }
    }
}

impl Config {
    /// Settings handed to one agent at registration: shared defaults, then
    /// credentials, then the agent's own overrides.
    pub fn effective_agent_config(&self, definition: &AgentDefinition) -> AgentConfig {
        let mut merged = self.processing.defaults.clone();

        if let Some(endpoint) = &self.processing.endpoint {
            merged.insert("endpoint".to_string(), endpoint.clone().into());
        }
        if let Some(api_key) = self.processing.resolve_api_key() {
            merged.insert("api_key".to_string(), api_key.into());
        }

        for (key, value) in &definition.config {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

#[async_trait::async_trait]
pub trait ConfigManager {
    async fn load_config(&self) -> Result<Config>;
    async fn save_config(&self, config: &Config) -> Result<()>;
    fn validate_config(&self, config: &Config) -> Result<()>;
}

pub struct FileConfigManager {
    config_path: PathBuf,
}

impl FileConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }
}

#[async_trait::async_trait]
impl ConfigManager for FileConfigManager {
    async fn load_config(&self) -> Result<Config> {
        info!("Loading configuration from {:?}", self.config_path);

        // check if config file exists, create default if not
        if !self.config_path.exists() {
            warn!("Configuration file not found, creating default config at {:?}", self.config_path);
            self.create_default_config().await?;
        }

        let settings = config::Config::builder()
            .add_source(
                config::File::from(self.config_path.clone()).format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| FleetError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| FleetError::ConfigError(format!("Failed to parse config: {}", e)))?;

        self.validate_config(&config)?;

        info!("Configuration loaded successfully: {} agents", config.agents.len());
        Ok(config)
    }

    fn validate_config(&self, config: &Config) -> Result<()> {
        debug!("Validating configuration");

        if config.agents.is_empty() {
            return Err(FleetError::ConfigError("Agent list cannot be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for agent in &config.agents {
            if agent.id.trim().is_empty() {
                return Err(FleetError::ConfigError("Agent id cannot be empty".to_string()));
            }
            if agent.id.contains(char::is_whitespace) {
                return Err(FleetError::ConfigError(format!(
                    "Agent id '{}' cannot contain whitespace",
                    agent.id
                )));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(FleetError::ConfigError(format!(
                    "Agent id '{}' is listed more than once",
                    agent.id
                )));
            }
            if !agent.channel.is_supported() {
                warn!(
                    "Agent {} uses unknown channel kind '{}' and will not be started",
                    agent.id, agent.channel
                );
            }
        }

        let settings = &config.orchestrator;
        let intervals = [
            ("heartbeat_interval", settings.heartbeat_interval),
            ("poll_interval", settings.poll_interval),
            ("init_timeout", settings.init_timeout),
            ("processing_timeout", settings.processing_timeout),
            ("shutdown_timeout", settings.shutdown_timeout),
            ("status_interval", config.monitoring.status_interval),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(FleetError::ConfigError(format!("{} must be greater than 0", name)));
            }
        }
        if settings.min_runnable_agents == 0 {
            return Err(FleetError::ConfigError(
                "min_runnable_agents must be at least 1".to_string(),
            ));
        }

        if config.processing.backend == ProcessingBackend::Webhook {
            match config.processing.endpoint.as_deref() {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
                Some(_) => {
                    return Err(FleetError::ConfigError(
                        "processing.endpoint must start with http:// or https://".to_string(),
                    ))
                }
                None => {
                    return Err(FleetError::ConfigError(
                        "processing.endpoint is required for the webhook backend".to_string(),
                    ))
                }
            }
        }

        if config.monitoring.api_enabled && config.monitoring.api_port < 1024 {
            return Err(FleetError::ConfigError(
                "api_port must be between 1024 and 65535".to_string(),
            ));
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    async fn save_config(&self, config: &Config) -> Result<()> {
        info!("Saving configuration to {:?}", self.config_path);

        let toml_content = toml::to_string_pretty(config)
            .map_err(|e| FleetError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        fs::write(&self.config_path, toml_content)
            .map_err(|e| FleetError::ConfigError(format!("Failed to write config file: {}", e)))?;

        info!("Configuration saved successfully");
        Ok(())
    }
}

impl FileConfigManager {
    /// Create a default configuration file
    async fn create_default_config(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    FleetError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        self.save_config(&Config::default()).await?;
        info!("Default configuration file created at {:?}", self.config_path);
        Ok(())
    }
}
