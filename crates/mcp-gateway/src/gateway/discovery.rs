//! Configuration-file discovery from editor install paths: a pure file-scan
//! with fixed JSON shapes (spec §1, §4.3 "Discovery vs activation").
//!
//! Grounded on the original `settings_discovery.py`'s per-editor path lists
//! and `discover_all_settings`'s first-instance-wins dedup; reimplemented as
//! a synchronous `std::fs` scan since no editor config lives behind a
//! network call.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{McpServersConfig, UpstreamConfig, UpstreamTransportConfig};

use super::Gateway;

/// One known editor's config location plus how to pull `mcpServers`-shaped
/// entries out of its document.
struct EditorSource {
    source_tag: &'static str,
    paths: fn() -> Vec<PathBuf>,
    extract: fn(&Value) -> Option<&Value>,
}

const SOURCES: &[EditorSource] = &[
    EditorSource {
        source_tag: "cursor",
        paths: cursor_paths,
        extract: |doc| doc.get("mcpServers"),
    },
    EditorSource {
        source_tag: "windsurf",
        paths: windsurf_paths,
        extract: |doc| doc.get("mcpServers"),
    },
    EditorSource {
        source_tag: "claude-desktop",
        paths: claude_desktop_paths,
        extract: |doc| doc.get("mcpServers"),
    },
    EditorSource {
        source_tag: "vscode",
        paths: vscode_paths,
        // VS Code nests the same shape under `mcp.servers` in `settings.json`.
        extract: |doc| doc.get("mcp").and_then(|m| m.get("servers")),
    },
];

fn home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn cursor_paths() -> Vec<PathBuf> {
    let Some(home) = home() else { return Vec::new() };
    vec![home.join(".cursor").join("mcp.json"), home.join(".cursor").join("mcp_servers.json")]
}

fn windsurf_paths() -> Vec<PathBuf> {
    let Some(home) = home() else { return Vec::new() };
    vec![home.join(".windsurf").join("mcp_servers.json")]
}

fn claude_desktop_paths() -> Vec<PathBuf> {
    let Some(home) = home() else { return Vec::new() };
    vec![home.join(".claude").join("claude_desktop_config.json")]
}

fn vscode_paths() -> Vec<PathBuf> {
    let Some(home) = home() else { return Vec::new() };
    vec![home.join(".vscode").join("settings.json")]
}

/// Parse one `{name: {command|url, ...}}` object into `UpstreamConfig`s
/// tagged with `source_tag`. A per-entry parse failure is logged and skipped;
/// it never aborts the rest of the scan.
fn parse_entries(servers: &Value, source_tag: &str) -> HashMap<String, UpstreamConfig> {
    let mut out = HashMap::new();
    let Some(map) = servers.as_object() else { return out };

    for (name, entry) in map {
        let mut value = entry.clone();
        if let Some(obj) = value.as_object_mut() {
            obj.entry("name").or_insert_with(|| Value::String(name.clone()));
            obj.insert("source".to_string(), Value::String(source_tag.to_string()));
            obj.entry("enabled").or_insert(Value::Bool(false));
        }
        match serde_json::from_value::<UpstreamConfig>(value) {
            Ok(config) if config.validate().is_ok() => {
                out.insert(name.clone(), config);
            }
            Ok(_) => warn!(name, source_tag, "discovered upstream failed name validation"),
            Err(e) => warn!(name, source_tag, error = %e, "failed to parse discovered upstream"),
        }
    }
    out
}

/// Scan every known editor path, returning the union of valid entries.
/// First instance found for a given name wins, matching the original's
/// "keeping first instance" dedup.
pub fn scan_editor_configs() -> HashMap<String, UpstreamConfig> {
    let mut discovered = HashMap::new();

    for source in SOURCES {
        for path in (source.paths)() {
            if !path.exists() {
                continue;
            }
            let contents = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read discovered config");
                    continue;
                }
            };
            let doc: Value = match serde_json::from_str(&contents) {
                Ok(v) => v,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "discovered config is not valid JSON");
                    continue;
                }
            };
            let Some(servers) = (source.extract)(&doc) else { continue };
            for (name, config) in parse_entries(servers, source.source_tag) {
                discovered.entry(name).or_insert(config);
            }
            debug!(path = %path.display(), "scanned editor config");
        }
    }

    discovered
}

impl Gateway {
    /// Re-scan editor configs, merge with `configured` (configured wins on
    /// name collision), and materialize any name not already known as a
    /// `Disconnected` upstream. Upstreams already loaded are left untouched,
    /// so repeated calls with no config changes are a no-op (spec §8).
    pub fn refresh_discovery(&self, configured: &McpServersConfig) {
        let mut merged = configured.clone();
        merged.merge_discovered(scan_editor_configs());

        let mut new_entries = HashMap::new();
        for (name, config) in merged.mcp_servers {
            if self.upstream(&name).is_none() {
                new_entries.insert(name, config);
            }
        }
        if new_entries.is_empty() {
            return;
        }
        self.load_upstreams(new_entries);
        self.rebuild_aggregator();
    }

    /// Enable every loaded upstream whose config opts into auto-start, per
    /// spec §4.3: "Upstreams become Connecting/Connected only via explicit
    /// `enable_upstream` ... or if their config flag `enabled == true`."
    pub async fn auto_enable_configured(&self) {
        let names: Vec<String> = self
            .list_upstream_names()
            .into_iter()
            .filter(|n| self.upstream(n).map(|u| u.config.enabled).unwrap_or(false))
            .collect();

        for name in names {
            if let Err(e) = self.enable_upstream(&name).await {
                warn!(upstream = name, error = %e, "auto-enable failed");
            }
        }
    }
}
