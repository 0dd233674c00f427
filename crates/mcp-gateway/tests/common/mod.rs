//! Shared helpers for the integration tests in this directory.

use std::collections::HashMap;

use mcp_gateway::config::{UpstreamConfig, UpstreamTransportConfig};

/// Path to the fake stdio upstream fixture, resolved relative to this crate
/// so the tests work regardless of the cwd `cargo test` is invoked from.
fn fixture_path() -> String {
    format!(
        "{}/tests/fixtures/fake_upstream.py",
        env!("CARGO_MANIFEST_DIR")
    )
}

/// An `UpstreamConfig` that spawns the fake upstream with the given env vars
/// (`FAKE_TOOL_NAME`, `FAKE_TOOL_TEXT`, `FAKE_TOOL_SLEEP_MS`, `FAKE_RESOURCE_URI`,
/// `FAKE_SERVER_NAME`) layered over the current process's own environment.
pub fn fake_upstream_config(name: &str, env: HashMap<String, String>) -> UpstreamConfig {
    UpstreamConfig {
        name: name.to_string(),
        transport: UpstreamTransportConfig::Stdio {
            command: "python3".to_string(),
            args: vec![fixture_path()],
            env,
        },
        enabled: true,
        timeout_seconds: 10,
        max_retries: 3,
        source: "test".to_string(),
    }
}

pub fn env_with(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}
