//! Configuration types for mcp-gateway
//!
//! Layered via the `config` crate: defaults → `mcpServers` JSON file → environment → CLI flags.

use std::collections::HashMap;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// Declarative configuration for a single upstream, as found in the `mcpServers` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Unique name, `[A-Za-z0-9_-]{1,50}`.
    pub name: String,
    #[serde(flatten)]
    pub transport: UpstreamTransportConfig,
    /// Whether the upstream should be connected automatically at startup.
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "timeout", default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Where this entry came from: "config" or a discovery source tag.
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_source() -> String {
    "config".to_string()
}

/// Exactly one of `{command, url}` is set, matching the spec's `UpstreamConfig` invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpstreamTransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Network {
        url: String,
        #[serde(default)]
        transport: NetworkTransportKind,
        #[serde(default = "default_sse_endpoint")]
        sse_endpoint: String,
        #[serde(default = "default_messages_endpoint")]
        messages_endpoint: String,
    },
}

fn default_sse_endpoint() -> String {
    "/sse".to_string()
}

fn default_messages_endpoint() -> String {
    "/messages".to_string()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkTransportKind {
    #[default]
    Sse,
    Http,
}

impl UpstreamConfig {
    /// Validate the name and transport invariants named in spec §3.
    pub fn validate(&self) -> GatewayResult<()> {
        let valid_name = !self.name.is_empty()
            && self.name.len() <= 50
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid_name {
            return Err(GatewayError::config_with_key(
                format!("upstream name '{}' must match [A-Za-z0-9_-]{{1,50}}", self.name),
                "name",
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// The whole `mcpServers` runtime configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpServersConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: HashMap<String, UpstreamConfig>,
}

impl McpServersConfig {
    /// Merge `discovered` entries into `self`, with configured entries winning on name collision.
    pub fn merge_discovered(&mut self, discovered: HashMap<String, UpstreamConfig>) {
        for (name, cfg) in discovered {
            self.mcp_servers.entry(name).or_insert(cfg);
        }
    }

    /// Load the `mcpServers` document from disk. A missing file is not an
    /// error — it's the same as an empty document (spec §6 default-to-empty).
    pub fn load_from_path(path: &std::path::Path) -> GatewayResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(GatewayError::from)
    }

    /// Write the `mcpServers` document back to disk (spec §8 round-trip
    /// property: `save_config(load_config())` is a no-op modulo map ordering).
    pub fn save_to_path(&self, path: &std::path::Path) -> GatewayResult<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Prefixing strategy for the aggregator (spec §4.2). Fixed at construction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PrefixStrategy {
    #[default]
    ByName,
    ShortName,
    None,
}

/// Top-level gateway settings, assembled from defaults/file/env/CLI (spec §6/§12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_seconds: u64,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Optional bearer token; when set the endpoint's Bearer-token check is enforced
    /// (Open Question #1 — see DESIGN.md). Never serialized back out.
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,
    /// Open Question #2: gate the auto-session escape hatch. Defaults to on.
    #[serde(default = "default_true")]
    pub auto_session: bool,
    /// Open Question #3: prefix strategy surface; only `ByName` is exercised by default.
    #[serde(default)]
    pub prefix_strategy: PrefixStrategy,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8020
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            health_check_interval_seconds: default_health_check_interval(),
            connection_timeout_seconds: default_connection_timeout(),
            max_retries: default_max_retries(),
            api_key: None,
            auto_session: true,
            prefix_strategy: PrefixStrategy::default(),
        }
    }
}

impl GatewaySettings {
    /// Load settings from the layered sources: defaults, `GATEWAY_*`/env vars.
    ///
    /// File-based and CLI-flag layers are applied by the caller (the `config` crate
    /// builder composes them); this constructs the env layer, the one mcp-gateway
    /// always has available regardless of CLI invocation.
    pub fn from_env() -> GatewayResult<Self> {
        let builder = config::Config::builder()
            .set_default("host", default_host())?
            .set_default("port", i64::from(default_port()))?
            .set_default("log_level", default_log_level())?
            .set_default(
                "health_check_interval_seconds",
                default_health_check_interval() as i64,
            )?
            .set_default("connection_timeout_seconds", default_connection_timeout() as i64)?
            .set_default("max_retries", i64::from(default_max_retries()))?
            .set_default("auto_session", true)?
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .try_parsing(true)
                    .separator("_"),
            );

        let cfg = builder.build().map_err(|e| GatewayError::config(e.to_string()))?;
        cfg.try_deserialize().map_err(|e| GatewayError::config(e.to_string()))
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdio_config_validates() {
        let cfg = UpstreamConfig {
            name: "alpha".to_string(),
            transport: UpstreamTransportConfig::Stdio {
                command: "python".to_string(),
                args: vec![],
                env: HashMap::new(),
            },
            enabled: true,
            timeout_seconds: 60,
            max_retries: 3,
            source: "config".to_string(),
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bad_name_rejected() {
        let cfg = UpstreamConfig {
            name: "bad name!".to_string(),
            transport: UpstreamTransportConfig::Stdio {
                command: "python".to_string(),
                args: vec![],
                env: HashMap::new(),
            },
            enabled: true,
            timeout_seconds: 60,
            max_retries: 3,
            source: "config".to_string(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn merge_discovered_configured_wins() {
        let mut cfg = McpServersConfig::default();
        cfg.mcp_servers.insert(
            "alpha".to_string(),
            UpstreamConfig {
                name: "alpha".to_string(),
                transport: UpstreamTransportConfig::Stdio {
                    command: "configured".to_string(),
                    args: vec![],
                    env: HashMap::new(),
                },
                enabled: true,
                timeout_seconds: 60,
                max_retries: 3,
                source: "config".to_string(),
            },
        );
        let mut discovered = HashMap::new();
        discovered.insert(
            "alpha".to_string(),
            UpstreamConfig {
                name: "alpha".to_string(),
                transport: UpstreamTransportConfig::Stdio {
                    command: "discovered".to_string(),
                    args: vec![],
                    env: HashMap::new(),
                },
                enabled: false,
                timeout_seconds: 60,
                max_retries: 3,
                source: "editor".to_string(),
            },
        );
        cfg.merge_discovered(discovered);
        match &cfg.mcp_servers["alpha"].transport {
            UpstreamTransportConfig::Stdio { command, .. } => assert_eq!(command, "configured"),
            _ => panic!("expected stdio transport"),
        }
    }

    #[test]
    fn deserializes_mcp_servers_document() {
        let json = serde_json::json!({
            "mcpServers": {
                "alpha": {
                    "name": "alpha",
                    "command": "python",
                    "args": ["server.py"],
                    "enabled": true
                },
                "beta": {
                    "name": "beta",
                    "url": "http://localhost:9000",
                    "transport": "sse"
                }
            }
        });
        let parsed: McpServersConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.mcp_servers.len(), 2);
        assert!(parsed.mcp_servers["alpha"].enabled);
    }

    #[test]
    fn wire_key_timeout_deserializes_into_timeout_seconds() {
        let json = serde_json::json!({
            "name": "alpha",
            "command": "python",
            "args": ["server.py"],
            "timeout": 5
        });
        let parsed: UpstreamConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.timeout_seconds, 5);
    }

    #[test]
    fn missing_config_file_loads_as_empty() {
        let path = std::path::Path::new("/nonexistent/mcp-gateway-test-config.json");
        let loaded = McpServersConfig::load_from_path(path).unwrap();
        assert!(loaded.mcp_servers.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("mcp-gateway-config-test-{}.json", std::process::id()));

        let mut cfg = McpServersConfig::default();
        cfg.mcp_servers.insert(
            "alpha".to_string(),
            UpstreamConfig {
                name: "alpha".to_string(),
                transport: UpstreamTransportConfig::Stdio {
                    command: "python".to_string(),
                    args: vec!["server.py".to_string()],
                    env: HashMap::new(),
                },
                enabled: true,
                timeout_seconds: 60,
                max_retries: 3,
                source: "config".to_string(),
            },
        );

        cfg.save_to_path(&path).unwrap();
        let loaded = McpServersConfig::load_from_path(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.mcp_servers.len(), 1);
        match &loaded.mcp_servers["alpha"].transport {
            UpstreamTransportConfig::Stdio { command, .. } => assert_eq!(command, "python"),
            _ => panic!("expected stdio transport"),
        }
    }
}
