//! Shared argument types for the `serve` command (spec §6 "CLI / env").
//!
//! Each flag shares its declaration with an environment variable the way the
//! teacher's `BackendArgs` wires `--cmd`/`--args`/`--http` to their env forms,
//! so an operator can configure the gateway purely through the environment in
//! a container and purely through flags on a workstation.

use clap::Args;

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Bind host for the client-facing endpoint.
    #[arg(long, env = "GATEWAY_HOST")]
    pub host: Option<String>,

    /// Bind port. If taken, the next 9 ports are tried in turn.
    #[arg(long, env = "GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Seconds between health-check passes.
    #[arg(long, env = "HEALTH_CHECK_INTERVAL")]
    pub health_check_interval: Option<u64>,

    /// Seconds before an upstream connection attempt is abandoned.
    #[arg(long, env = "CONNECTION_TIMEOUT")]
    pub connection_timeout: Option<u64>,

    /// Max consecutive health-check failures before an upstream goes `Failed`.
    #[arg(long, env = "MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Bearer token clients must present; unset means the endpoint enforces none.
    #[arg(long, env = "API_KEY")]
    pub api_key: Option<String>,

    /// Path to the `mcpServers` JSON config file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<std::path::PathBuf>,
}

impl ServeArgs {
    /// Apply any flags/env vars set over the layered `GatewaySettings`
    /// (defaults + `GatewaySettings::from_env`'s `GATEWAY_`-prefixed layer).
    /// CLI flags and their bare-name env vars are the final, highest-precedence
    /// layer (spec §12).
    pub fn apply(&self, settings: &mut crate::config::GatewaySettings) {
        if let Some(host) = &self.host {
            settings.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(log_level) = &self.log_level {
            settings.log_level = log_level.clone();
        }
        if let Some(secs) = self.health_check_interval {
            settings.health_check_interval_seconds = secs;
        }
        if let Some(secs) = self.connection_timeout {
            settings.connection_timeout_seconds = secs;
        }
        if let Some(max_retries) = self.max_retries {
            settings.max_retries = max_retries;
        }
        if let Some(api_key) = &self.api_key {
            settings.api_key = Some(api_key.clone().into());
        }
    }
}
