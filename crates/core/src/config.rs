use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::paths::Paths;

/// Environment variable that overrides `discord.salaiToken`.
pub const SALAI_TOKEN_ENV: &str = "MJLINK_SALAI_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConfig {
    /// User credential sent in the gateway identify frame and as the
    /// `Authorization` header for interactions.
    #[serde(default)]
    pub salai_token: String,
    #[serde(default)]
    pub server_id: String,
    #[serde(default)]
    pub channel_id: String,
    /// Author id of the image bot; frames from anyone else are ignored.
    #[serde(default = "default_bot_id")]
    pub bot_id: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_capabilities")]
    pub capabilities: u64,
}

fn default_bot_id() -> String {
    "936929561302675456".to_string()
}

fn default_session_id() -> String {
    "1f3dbdf09efdf93d81a3a6420882c92c".to_string()
}

fn default_ws_base_url() -> String {
    "wss://gateway.discord.gg/?encoding=json&v=9".to_string()
}

fn default_api_base_url() -> String {
    "https://discord.com/api/v9".to_string()
}

fn default_capabilities() -> u64 {
    8189
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            salai_token: String::new(),
            server_id: String::new(),
            channel_id: String::new(),
            bot_id: default_bot_id(),
            session_id: default_session_id(),
            ws_base_url: default_ws_base_url(),
            api_base_url: default_api_base_url(),
            capabilities: default_capabilities(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Delay between connection open and the first heartbeat.
    #[serde(default = "default_heartbeat_grace_secs")]
    pub heartbeat_grace_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Wait before correlating a final artifact, so that a delete frame for
    /// the interim message can land first.
    #[serde(default = "default_artifact_settle_ms")]
    pub artifact_settle_ms: u64,
    /// Pause after a failed connect attempt before the next one. Faults on an
    /// open connection reconnect immediately.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub remix: bool,
}

fn default_heartbeat_grace_secs() -> u64 {
    10
}

fn default_heartbeat_interval_secs() -> u64 {
    40
}

fn default_artifact_settle_ms() -> u64 {
    300
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_grace_secs: default_heartbeat_grace_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            artifact_settle_ms: default_artifact_settle_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            remix: false,
        }
    }
}

impl GatewayConfig {
    pub fn heartbeat_grace(&self) -> Duration {
        Duration::from_secs(self.heartbeat_grace_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn artifact_settle(&self) -> Duration {
        Duration::from_millis(self.artifact_settle_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VerificationConfig {
    /// Credential for the external label classifier. Without it the
    /// human-verification continuation is skipped.
    #[serde(default)]
    pub hugging_face_token: Option<String>,
}

impl VerificationConfig {
    pub fn credential(&self) -> Option<&str> {
        self.hugging_face_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_concurrency() -> usize {
    1
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_timeout_secs() -> u64 {
    100
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TasksConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();
            config.apply_env();
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(SALAI_TOKEN_ENV) {
            if !token.trim().is_empty() {
                self.discord.salai_token = token.trim().to_string();
            }
        }
    }

    /// Check the fields required to open the gateway.
    pub fn validate(&self) -> Result<()> {
        let d = &self.discord;
        if d.salai_token.trim().is_empty() {
            return Err(Error::Config(format!(
                "discord.salaiToken is empty (or set {})",
                SALAI_TOKEN_ENV
            )));
        }
        if d.channel_id.trim().is_empty() {
            return Err(Error::Config("discord.channelId is empty".to_string()));
        }
        if d.server_id.trim().is_empty() {
            return Err(Error::Config("discord.serverId is empty".to_string()));
        }
        if self.tasks.concurrency == 0 {
            return Err(Error::Config("tasks.concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}
