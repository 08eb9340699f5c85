use std::collections::HashMap;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SkynetError};

pub const DEFAULT_GATEWAY_PORT: u16 = 18789;
pub const DEFAULT_GATEWAY_BIND: &str = "127.0.0.1";
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024;

/// Top-level config (`skynet.toml` + `SKYNET_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkynetConfig {
    pub agents: AgentsConfig,
    pub providers: ProvidersConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub defaults: AgentDefaults,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            defaults: AgentDefaults::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_iterations: default_max_iterations(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            history: HistoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryMode {
    SessionOnly,
    Dual,
    AgentsdkOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_mode")]
    pub mode: HistoryMode,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            mode: default_history_mode(),
        }
    }
}

fn default_history_mode() -> HistoryMode {
    HistoryMode::SessionOnly
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub openrouter: Option<ApiKeyProvider>,
    pub openai: Option<ApiKeyProvider>,
    pub anthropic: Option<ApiKeyProvider>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyProvider {
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl GatewayConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub entries: HashMap<String, ChannelConfigEntry>,
}

/// Per-channel config. `accounts`, when present, registers one adapter per
/// enabled account; shared security fields here are inherited into each
/// account entry by `ChannelManager::setup_from_config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfigEntry {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_ids: Vec<String>,
    #[serde(default)]
    pub verification_token: Option<String>,
    #[serde(default)]
    pub encrypt_key: Option<String>,
    #[serde(default)]
    pub webhook_port: Option<u16>,
    #[serde(default)]
    pub accounts: HashMap<String, ChannelAccountEntry>,
    /// Opaque per-channel credentials (bot_token, app_id, corp_id, ...).
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelAccountEntry {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_ids: Vec<String>,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub shell: ShellToolConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShellToolConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub denied_cmds: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_path")]
    pub path: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            path: default_workspace_path(),
        }
    }
}

impl WorkspaceConfig {
    /// Expand a leading `~` to the user's home directory.
    pub fn expanded_path(&self) -> String {
        expand_tilde(&self.path)
    }
}

pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/{rest}")
    } else if path == "~" {
        std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
    } else {
        path.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Extra skill/plugin search roots beyond the fixed bundled/user/workspace
/// set the registry always resolves on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsConfig {
    #[serde(default)]
    pub extra_dirs: Vec<String>,
    #[serde(default)]
    pub plugin_dirs: Vec<String>,
    #[serde(default = "default_true")]
    pub watch: bool,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            extra_dirs: Vec::new(),
            plugin_dirs: Vec::new(),
            watch: default_true(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_debounce_ms() -> u64 {
    250
}

fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_max_iterations() -> u32 {
    25
}
fn default_temperature() -> f64 {
    1.0
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_gateway_host() -> String {
    DEFAULT_GATEWAY_BIND.to_string()
}
fn default_gateway_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}
fn default_read_timeout_secs() -> u64 {
    30
}
fn default_write_timeout_secs() -> u64 {
    30
}
fn default_workspace_path() -> String {
    "~/.skynet/workspace".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

const REQUIRED_DENIED_CMDS: [&str; 3] = ["rm -rf", "dd", "mkfs"];

impl SkynetConfig {
    /// Load config from a TOML file with `SKYNET_*` env var overrides,
    /// searching `./.skynet/config.toml`, `./config.toml`,
    /// `~/.skynet/config.toml` in that order unless `path` is given.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config: SkynetConfig = match path {
            Some(p) => Figment::new()
                .merge(Toml::file(p))
                .merge(Env::prefixed("SKYNET_").split("_"))
                .extract()
                .map_err(|e| SkynetError::Config(e.to_string()))?,
            None => {
                let mut figment = Figment::new();
                for candidate in Self::search_path_candidates() {
                    if std::path::Path::new(&candidate).exists() {
                        figment = figment.merge(Toml::file(candidate));
                        break;
                    }
                }
                figment
                    .merge(Env::prefixed("SKYNET_").split("_"))
                    .extract()
                    .map_err(|e| SkynetError::Config(e.to_string()))?
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn search_path_candidates() -> Vec<String> {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        vec![
            "./.skynet/config.toml".to_string(),
            "./config.toml".to_string(),
            format!("{home}/.skynet/config.toml"),
        ]
    }

    /// Validate the loaded shape per the external-interfaces contract.
    pub fn validate(&self) -> Result<()> {
        if self.agents.defaults.max_iterations == 0 {
            return Err(SkynetError::Config(
                "agents.defaults.max_iterations must be > 0".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.agents.defaults.temperature) {
            return Err(SkynetError::Config(
                "agents.defaults.temperature must be in [0, 2]".into(),
            ));
        }
        if self.agents.defaults.max_tokens == 0 {
            return Err(SkynetError::Config(
                "agents.defaults.max_tokens must be > 0".into(),
            ));
        }

        let keys = [
            self.providers.openrouter.as_ref(),
            self.providers.openai.as_ref(),
            self.providers.anthropic.as_ref(),
        ];
        let has_valid_key = keys.iter().flatten().any(|p| {
            let k = p.api_key.trim();
            k.len() >= 10 && !k.contains(' ')
        });
        if !has_valid_key {
            return Err(SkynetError::Config(
                "at least one provider api_key must be set (len >= 10, no spaces)".into(),
            ));
        }

        if self.gateway.port == 0 {
            return Err(SkynetError::Config(
                "gateway.port must be in 1..=65535".into(),
            ));
        }
        if self.gateway.read_timeout_secs == 0 || self.gateway.write_timeout_secs == 0 {
            return Err(SkynetError::Config(
                "gateway.read_timeout and write_timeout must be > 0".into(),
            ));
        }

        if self.tools.shell.enabled {
            for required in REQUIRED_DENIED_CMDS {
                if !self
                    .tools
                    .shell
                    .denied_cmds
                    .iter()
                    .any(|c| c == required)
                {
                    return Err(SkynetError::Config(format!(
                        "tools.shell.denied_cmds must contain '{required}' when shell is enabled"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> SkynetConfig {
        SkynetConfig {
            agents: AgentsConfig::default(),
            providers: ProvidersConfig {
                anthropic: Some(ApiKeyProvider {
                    api_key: "sk-ant-0123456789".into(),
                }),
                ..Default::default()
            },
            gateway: GatewayConfig::default(),
            channels: ChannelsConfig::default(),
            tools: ToolsConfig::default(),
            workspace: WorkspaceConfig::default(),
            logging: LoggingConfig::default(),
            skills: SkillsConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_missing_provider_key() {
        let mut cfg = base_config();
        cfg.providers.anthropic = None;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_short_api_key() {
        let mut cfg = base_config();
        cfg.providers.anthropic = Some(ApiKeyProvider {
            api_key: "short".into(),
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_temperature_out_of_range() {
        let mut cfg = base_config();
        cfg.agents.defaults.temperature = 2.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn shell_enabled_requires_denied_cmds() {
        let mut cfg = base_config();
        cfg.tools.shell.enabled = true;
        cfg.tools.shell.denied_cmds = vec!["rm -rf".into()];
        assert!(cfg.validate().is_err());
        cfg.tools.shell.denied_cmds = vec!["rm -rf".into(), "dd".into(), "mkfs".into()];
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn tilde_expansion() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(expand_tilde("~/skills"), "/home/tester/skills");
        assert_eq!(expand_tilde("/abs/path"), "/abs/path");
    }
}
