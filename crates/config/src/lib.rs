//! Configuration loading, validation, and management for redline.
//!
//! Loads configuration from `~/.redline/config.toml` (or an explicit path)
//! with environment variable overrides. Validates all settings at startup.

use redline_core::{Ability, Adversary, AgentDefaults, Fact};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.redline/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Agent defaults and first-contact behaviour
    #[serde(default)]
    pub agents: AgentsConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Contact channel configuration
    #[serde(default)]
    pub contacts: ContactsConfig,

    /// Result blob storage
    #[serde(default)]
    pub results: ResultsConfig,

    /// Operation run loop tuning
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Link timeout and agent trust watchdog
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Default fact learner patterns
    #[serde(default)]
    pub learning: LearningConfig,

    /// Abilities loaded into the data store at startup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub abilities: Vec<Ability>,

    /// Adversary profiles loaded into the data store at startup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adversaries: Vec<Adversary>,

    /// Named fact sources operations can seed from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceConfig>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default = "default_sleep_min")]
    pub sleep_min: u32,

    #[serde(default = "default_sleep_max")]
    pub sleep_max: u32,

    #[serde(default)]
    pub watchdog: u32,

    /// Seconds of silence before an agent is marked untrusted.
    #[serde(default = "default_untrusted_timer")]
    pub untrusted_timer: u64,

    /// `exe_name` assumed for agents that do not report one.
    #[serde(default = "default_implant_name")]
    pub implant_name: String,

    /// Abilities every new agent runs on first contact.
    #[serde(default)]
    pub bootstrap_abilities: Vec<String>,

    /// Abilities handed to deadman-capable agents to run on shutdown.
    #[serde(default)]
    pub deadman_abilities: Vec<String>,
}

fn default_sleep_min() -> u32 {
    30
}
fn default_sleep_max() -> u32 {
    60
}
fn default_untrusted_timer() -> u64 {
    90
}
fn default_implant_name() -> String {
    "splunkd".into()
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            sleep_min: default_sleep_min(),
            sleep_max: default_sleep_max(),
            watchdog: 0,
            untrusted_timer: default_untrusted_timer(),
            implant_name: default_implant_name(),
            bootstrap_abilities: vec![],
            deadman_abilities: vec![],
        }
    }
}

impl AgentsConfig {
    pub fn defaults(&self) -> AgentDefaults {
        AgentDefaults {
            sleep_min: self.sleep_min,
            sleep_max: self.sleep_max,
            watchdog: self.watchdog,
            implant_name: self.implant_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Maximum beacon body size.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_port() -> u16 {
    8888
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_body_limit() -> usize {
    16 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactsConfig {
    /// Name the HTTP beacon channel reports as.
    #[serde(default = "default_http_name")]
    pub http: String,

    /// Beacon audit entries kept per contact before the oldest are dropped.
    #[serde(default = "default_report_capacity")]
    pub report_capacity: usize,
}

fn default_http_name() -> String {
    "http".into()
}
fn default_report_capacity() -> usize {
    10_000
}

impl Default for ContactsConfig {
    fn default() -> Self {
        Self {
            http: default_http_name(),
            report_capacity: default_report_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultsConfig {
    /// Directory for result blobs. Defaults to `~/.redline/results`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl ResultsConfig {
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("results"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wait for results (terminal status) rather than delivery before the
    /// next planning pass.
    #[serde(default)]
    pub wait_for_result: bool,

    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_cleanup_timeout() -> u64 {
    60
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            wait_for_result: false,
            cleanup_timeout_secs: default_cleanup_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_watchdog_interval")]
    pub interval_secs: u64,

    /// Added to an executor's timeout before a delivered link is timed out.
    #[serde(default = "default_link_grace")]
    pub link_grace_secs: u64,
}

fn default_watchdog_interval() -> u64 {
    5
}
fn default_link_grace() -> u64 {
    30
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_watchdog_interval(),
            link_grace_secs: default_link_grace(),
        }
    }
}

/// A regex the default learner runs over output; each match becomes a fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    #[serde(rename = "trait")]
    pub trait_name: String,
    pub regex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_patterns")]
    pub patterns: Vec<PatternConfig>,
}

fn default_patterns() -> Vec<PatternConfig> {
    vec![
        PatternConfig {
            trait_name: "host.ip.address".into(),
            regex: r"\b(?:\d{1,3}\.){3}\d{1,3}\b".into(),
        },
        PatternConfig {
            trait_name: "host.file.path".into(),
            regex: r"(?:/[\w.\-]+){2,}".into(),
        },
    ]
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            patterns: default_patterns(),
        }
    }
}

/// A named set of seed facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    #[serde(default)]
    pub facts: Vec<Fact>,
}

impl AppConfig {
    /// Load configuration from `REDLINE_CONFIG` or the default path
    /// (~/.redline/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `REDLINE_HOST`
    /// - `REDLINE_PORT`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_path(&Self::config_path())
    }

    /// Load from `path`, then apply environment overrides.
    pub fn load_path(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// `REDLINE_CONFIG`, or `~/.redline/config.toml`.
    pub fn config_path() -> PathBuf {
        std::env::var("REDLINE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"))
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var("REDLINE_HOST") {
            self.gateway.host = host;
        }
        if let Ok(port) = std::env::var("REDLINE_PORT") {
            self.gateway.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("REDLINE_PORT is not a port number: {port}"))
            })?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".redline")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agents.sleep_min > self.agents.sleep_max {
            return Err(ConfigError::ValidationError(
                "agents.sleep_min must not exceed agents.sleep_max".into(),
            ));
        }

        if self.planner.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "planner.poll_interval_ms must be > 0".into(),
            ));
        }

        if self.watchdog.enabled && self.watchdog.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "watchdog.interval_secs must be > 0".into(),
            ));
        }

        for adversary in &self.adversaries {
            for ability_id in &adversary.atomic_ordering {
                if !self.abilities.iter().any(|a| &a.ability_id == ability_id) {
                    tracing::warn!(
                        adversary = %adversary.adversary_id,
                        ability = %ability_id,
                        "Adversary references an ability that is not configured"
                    );
                }
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.port, 8888);
        assert_eq!(config.contacts.http, "http");
        assert_eq!(config.agents.sleep_min, 30);
        assert!(!config.planner.wait_for_result);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.learning.patterns, config.learning.patterns);
    }

    #[test]
    fn inverted_sleep_bounds_rejected() {
        let mut config = AppConfig::default();
        config.agents.sleep_min = 90;
        config.agents.sleep_max = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let mut config = AppConfig::default();
        config.planner.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().gateway.port, 8888);
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("[agents]"));
        assert!(toml_str.contains("[planner]"));
    }

    #[test]
    fn abilities_and_adversaries_parse() {
        let toml_str = r#"
[agents]
sleep_min = 5
sleep_max = 10
implant_name = "beacond"
deadman_abilities = ["cleanup-1"]

[[abilities]]
ability_id = "whoami"
name = "Identify user"
visibility = 20

[[abilities.executors]]
name = "sh"
platform = "linux"
command = "whoami"

[[adversaries]]
adversary_id = "recon"
name = "Recon"
atomic_ordering = ["whoami"]
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, toml_str).unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.agents.defaults().sleep_max, 10);
        assert_eq!(config.agents.defaults().implant_name, "beacond");
        assert_eq!(config.agents.deadman_abilities, vec!["cleanup-1".to_string()]);
        assert_eq!(config.abilities[0].executors[0].command, "whoami");
        assert_eq!(config.abilities[0].visibility, 20);
        assert_eq!(config.adversaries[0].atomic_ordering, vec!["whoami".to_string()]);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agents\nsleep_min = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }
}
