//! Configuration loading and validation.
//!
//! One TOML file owns every tunable; `.env` is loaded first so deployment
//! secrets (gateway URL, database path) can override without editing the
//! file.

use std::path::Path;

use anyhow::Context as _;
use regex::Regex;
use serde::Deserialize;

use crate::router::RouterOptions;

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Bot behaviour: prefixes, session timeout, seed root user.
    pub bot: BotConfig,

    /// Gateway sidecar connection.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Persistence locations.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Bot behaviour settings.
#[derive(Debug, Deserialize)]
pub struct BotConfig {
    /// User id seeded as the root operator on first boot.
    pub initial_root_user: String,

    /// First token selecting the root scope.
    #[serde(default = "default_root_prefix")]
    pub root_prefix: String,

    /// First token selecting the admin scope.
    #[serde(default = "default_admin_prefix")]
    pub admin_prefix: String,

    /// Leading characters marking a line as addressed to the bot.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Full override for the invocation regex (capture group 1 must hold
    /// the line remainder). Takes precedence over `command_prefix`.
    #[serde(default)]
    pub invoke_prefix_pattern: Option<String>,

    /// Interactive session inactivity timeout in seconds.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: i64,
}

/// Gateway sidecar connection settings.
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the bridge.
    #[serde(default = "default_gateway_url")]
    pub base_url: String,

    /// Per-request timeout for outbound calls, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Persistence locations.
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path or URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Directory for rotated JSON log files.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            logs_dir: default_logs_dir(),
        }
    }
}

fn default_root_prefix() -> String {
    "root".to_owned()
}

fn default_admin_prefix() -> String {
    "admin".to_owned()
}

fn default_command_prefix() -> String {
    ".".to_owned()
}

fn default_session_timeout() -> i64 {
    crate::session::DEFAULT_SESSION_TIMEOUT_SECS
}

fn default_gateway_url() -> String {
    format!("http://127.0.0.1:{}", crate::gateway::DEFAULT_BRIDGE_PORT)
}

fn default_request_timeout() -> u64 {
    30
}

fn default_database_url() -> String {
    "sqlite://hornbill.db".to_owned()
}

fn default_logs_dir() -> String {
    "logs".to_owned()
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.bot.initial_root_user.is_empty() {
            anyhow::bail!("bot.initial_root_user must be set");
        }
        if self.bot.root_prefix == self.bot.admin_prefix {
            anyhow::bail!("bot.root_prefix and bot.admin_prefix must differ");
        }
        self.invoke_pattern()?;
        Ok(())
    }

    /// The compiled invocation pattern: the explicit override, the default
    /// for the `.` prefix, or one built from the configured prefix.
    pub fn invoke_pattern(&self) -> anyhow::Result<Regex> {
        if let Some(pattern) = &self.bot.invoke_prefix_pattern {
            return Regex::new(pattern)
                .with_context(|| format!("invalid invoke_prefix_pattern '{pattern}'"));
        }
        if self.bot.command_prefix == "." {
            return Ok(crate::router::default_invoke_pattern());
        }
        let escaped = regex::escape(&self.bot.command_prefix);
        Regex::new(&format!(r"^{escaped}\s*(\S[\s\S]*)$"))
            .with_context(|| format!("invalid command_prefix '{}'", self.bot.command_prefix))
    }

    /// Router tunables derived from this config.
    pub fn router_options(&self) -> anyhow::Result<RouterOptions> {
        Ok(RouterOptions {
            root_prefix: self.bot.root_prefix.clone(),
            admin_prefix: self.bot.admin_prefix.clone(),
            invoke_pattern: self.invoke_pattern()?,
            session_timeout_secs: self.bot.session_timeout_secs,
        })
    }

    /// Starter config written by the `init` subcommand.
    pub fn example_toml() -> &'static str {
        r#"[bot]
# User id granted root on first boot.
initial_root_user = "491701234567@s.whatsapp.net"
root_prefix = "root"
admin_prefix = "admin"
command_prefix = "."
session_timeout_secs = 300

[gateway]
base_url = "http://127.0.0.1:3001"
request_timeout_secs = 30

[storage]
database_url = "sqlite://hornbill.db"
logs_dir = "logs"
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Config {
        toml::from_str(text).expect("parse")
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = parse(Config::example_toml());
        config.validate().expect("valid");
        assert_eq!(config.bot.root_prefix, "root");
        assert_eq!(config.gateway.request_timeout_secs, 30);
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse("[bot]\ninitial_root_user = \"r@s.whatsapp.net\"\n");
        assert_eq!(config.bot.command_prefix, ".");
        assert_eq!(config.bot.session_timeout_secs, 300);
        assert_eq!(config.storage.database_url, "sqlite://hornbill.db");
        assert!(config.gateway.base_url.ends_with(":3001"));
    }

    #[test]
    fn test_missing_root_user_rejected() {
        let config = parse("[bot]\ninitial_root_user = \"\"\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_equal_prefixes_rejected() {
        let config = parse(
            "[bot]\ninitial_root_user = \"r@x\"\nroot_prefix = \"sudo\"\nadmin_prefix = \"sudo\"\n",
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_custom_command_prefix_builds_pattern() {
        let config = parse("[bot]\ninitial_root_user = \"r@x\"\ncommand_prefix = \"!\"\n");
        let pattern = config.invoke_pattern().expect("pattern");
        let caps = pattern.captures("!ping").expect("match");
        assert_eq!(caps.get(1).map(|m| m.as_str()), Some("ping"));
        assert!(pattern.captures(".ping").is_none());
    }

    #[test]
    fn test_default_pattern_rejects_double_dot() {
        let config = parse("[bot]\ninitial_root_user = \"r@x\"\n");
        let pattern = config.invoke_pattern().expect("pattern");
        assert!(pattern.captures(".ping").is_some());
        assert!(pattern.captures("..ping").is_none());
    }

    #[test]
    fn test_explicit_pattern_wins() {
        let config = parse(
            "[bot]\ninitial_root_user = \"r@x\"\ninvoke_prefix_pattern = \"^>>(.+)$\"\n",
        );
        let pattern = config.invoke_pattern().expect("pattern");
        assert!(pattern.captures(">>ping").is_some());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let config =
            parse("[bot]\ninitial_root_user = \"r@x\"\ninvoke_prefix_pattern = \"([\"\n");
        assert!(config.validate().is_err());
    }
}
