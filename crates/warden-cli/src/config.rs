use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;
use warden_core::{WardenError, WardenResult};
use warden_orchestrator::OrchestratorConfig;

/// Contents of `warden.toml`.
///
/// ```toml
/// data_dir = "./data"
///
/// [orchestrator]
/// stale_threshold_secs = 1800
///
/// [orchestrator.retry]
/// max_attempts = 10
///
/// [notifier]
/// command = "agentctl"
/// args = ["agent", "--agent", "{agent_id}", "--message", "{message}"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// How agents are messaged. Without a `command`, messages are only logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments; `{agent_id}` and `{message}` are substituted per call.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            orchestrator: OrchestratorConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }
}

impl WardenConfig {
    pub fn parse(raw: &str) -> WardenResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| WardenError::Config(format!("Invalid config: {e}")))?;
        config.orchestrator.validate()?;
        if config.notifier.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(WardenError::Config("notifier.command must not be empty".into()));
        }
        Ok(config)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub async fn load(path: &Path) -> WardenResult<Self> {
        if !tokio::fs::try_exists(path).await? {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            WardenError::Config(format!("Failed to read config file '{}': {e}", path.display()))
        })?;
        Self::parse(&raw)
    }
}
