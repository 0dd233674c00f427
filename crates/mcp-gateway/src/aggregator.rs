//! Namespace aggregation: merges each Connected upstream's tools/resources
//! into a single prefixed namespace with collision detection and
//! bidirectional lookup.
//!
//! The published view is an immutable snapshot swapped atomically via
//! `arc_swap::ArcSwap`, grounded on the `ArcSwap<RuntimeState>` pattern in
//! Snakeway's `PublicGateway` — readers (the endpoint dispatch path) never
//! block a rebuild, and a rebuild never blocks a reader.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::warn;

use crate::config::PrefixStrategy;
use crate::model::{AggregatedResource, AggregatedTool, Upstream, UpstreamStatus};

const TOOL_SEP: &str = ".";
const RESOURCE_SEP: &str = "://";

#[derive(Debug, Default)]
struct Snapshot {
    tools: Vec<AggregatedTool>,
    tool_index: HashMap<String, usize>,
    resources: Vec<AggregatedResource>,
    resource_index: HashMap<String, usize>,
    tool_conflicts: HashMap<String, u32>,
    resource_conflicts: HashMap<String, u32>,
}

/// Merges Connected upstreams' capabilities into one namespace.
///
/// Prefixing strategy is fixed at construction (spec §4.2).
pub struct Aggregator {
    strategy: PrefixStrategy,
    snapshot: ArcSwap<Snapshot>,
}

impl Aggregator {
    pub fn new(strategy: PrefixStrategy) -> Self {
        Self {
            strategy,
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    fn prefix_for(&self, upstream: &str) -> String {
        match self.strategy {
            PrefixStrategy::ByName => upstream.to_string(),
            PrefixStrategy::ShortName => upstream
                .split('-')
                .next()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| upstream.chars().take(8).collect()),
            PrefixStrategy::None => String::new(),
        }
    }

    fn prefixed_tool_name(&self, upstream: &str, original: &str) -> String {
        let prefix = self.prefix_for(upstream);
        if prefix.is_empty() {
            original.to_string()
        } else {
            format!("{prefix}{TOOL_SEP}{original}")
        }
    }

    fn prefixed_resource_uri(&self, upstream: &str, original: &str) -> String {
        let prefix = self.prefix_for(upstream);
        if prefix.is_empty() {
            original.to_string()
        } else {
            format!("{prefix}{RESOURCE_SEP}{original}")
        }
    }

    /// Full rebuild over `upstreams`, iterated in the order given — callers
    /// must pass a deterministic order (e.g. sorted by name) so that lookups
    /// by original name resolve ties the same way across rebuilds.
    /// Non-Connected upstreams are skipped entirely.
    pub fn rebuild(&self, upstreams: &[Arc<Upstream>]) {
        let mut snapshot = Snapshot::default();

        let mut tool_name_counts: HashMap<String, u32> = HashMap::new();
        let mut resource_uri_counts: HashMap<String, u32> = HashMap::new();
        for upstream in upstreams {
            if upstream.status() != UpstreamStatus::Connected {
                continue;
            }
            for tool in upstream.tools.read().iter() {
                *tool_name_counts.entry(tool.name.clone()).or_insert(0) += 1;
            }
            for resource in upstream.resources.read().iter() {
                *resource_uri_counts.entry(resource.uri.clone()).or_insert(0) += 1;
            }
        }

        for (name, count) in &tool_name_counts {
            if *count > 1 {
                warn!(tool = %name, count, "tool name collision across upstreams");
                snapshot.tool_conflicts.insert(name.clone(), *count);
            }
        }
        for (uri, count) in &resource_uri_counts {
            if *count > 1 {
                warn!(resource = %uri, count, "resource uri collision across upstreams");
                snapshot.resource_conflicts.insert(uri.clone(), *count);
            }
        }

        for upstream in upstreams {
            if upstream.status() != UpstreamStatus::Connected {
                continue;
            }
            let owner = upstream.name().to_string();

            for tool in upstream.tools.read().iter() {
                let prefixed = self.prefixed_tool_name(&owner, &tool.name);
                if snapshot.tool_index.contains_key(&prefixed) {
                    continue;
                }
                let entry = AggregatedTool {
                    original: tool.name.clone(),
                    prefixed: prefixed.clone(),
                    owner_upstream: owner.clone(),
                    description: tool.description.clone(),
                    schema: tool.input_schema.clone(),
                };
                snapshot.tool_index.insert(prefixed, snapshot.tools.len());
                snapshot.tools.push(entry);
            }

            for resource in upstream.resources.read().iter() {
                let prefixed = self.prefixed_resource_uri(&owner, &resource.uri);
                if snapshot.resource_index.contains_key(&prefixed) {
                    continue;
                }
                let entry = AggregatedResource {
                    original: resource.uri.clone(),
                    prefixed: prefixed.clone(),
                    owner_upstream: owner.clone(),
                    description: resource.description.clone(),
                    mime_type: resource.mime_type.clone(),
                };
                snapshot.resource_index.insert(prefixed, snapshot.resources.len());
                snapshot.resources.push(entry);
            }
        }

        self.snapshot.store(Arc::new(snapshot));
    }

    /// Resolve a client-supplied tool name via the three-tier lookup in spec §4.2.
    pub fn find_tool(&self, query: &str) -> Option<AggregatedTool> {
        let snapshot = self.snapshot.load();
        if let Some(&idx) = snapshot.tool_index.get(query) {
            return snapshot.tools.get(idx).cloned();
        }
        if let Some(candidate) = flatten_once(query, TOOL_SEP) {
            if let Some(&idx) = snapshot.tool_index.get(&candidate) {
                return snapshot.tools.get(idx).cloned();
            }
        }
        snapshot.tools.iter().find(|t| t.original == query).cloned()
    }

    /// Resolve a client-supplied resource uri via the same three-tier lookup.
    pub fn find_resource(&self, query: &str) -> Option<AggregatedResource> {
        let snapshot = self.snapshot.load();
        if let Some(&idx) = snapshot.resource_index.get(query) {
            return snapshot.resources.get(idx).cloned();
        }
        if let Some(candidate) = flatten_once(query, RESOURCE_SEP) {
            if let Some(&idx) = snapshot.resource_index.get(&candidate) {
                return snapshot.resources.get(idx).cloned();
            }
        }
        snapshot.resources.iter().find(|r| r.original == query).cloned()
    }

    pub fn list_tools(&self) -> Vec<AggregatedTool> {
        self.snapshot.load().tools.clone()
    }

    pub fn list_resources(&self) -> Vec<AggregatedResource> {
        self.snapshot.load().resources.clone()
    }

    pub fn tool_conflicts(&self) -> HashMap<String, u32> {
        self.snapshot.load().tool_conflicts.clone()
    }

    pub fn resource_conflicts(&self) -> HashMap<String, u32> {
        self.snapshot.load().resource_conflicts.clone()
    }
}

/// Rewrite the first underscore in `query` as `sep`, for clients that can't send dots.
fn flatten_once(query: &str, sep: &str) -> Option<String> {
    let idx = query.find('_')?;
    Some(format!("{}{sep}{}", &query[..idx], &query[idx + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{UpstreamConfig, UpstreamTransportConfig};
    use crate::model::{Resource, Tool};
    use std::collections::HashMap as StdHashMap;

    fn upstream(name: &str, tools: Vec<Tool>, resources: Vec<Resource>) -> Arc<Upstream> {
        let config = UpstreamConfig {
            name: name.to_string(),
            transport: UpstreamTransportConfig::Stdio {
                command: "echo".to_string(),
                args: vec![],
                env: StdHashMap::new(),
            },
            enabled: true,
            timeout_seconds: 60,
            max_retries: 3,
            source: "config".to_string(),
        };
        let upstream = Upstream::new(config);
        upstream.set_status(UpstreamStatus::Connected);
        *upstream.tools.write() = tools;
        *upstream.resources.write() = resources;
        Arc::new(upstream)
    }

    fn tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            description: String::new(),
            input_schema: serde_json::json!({}),
        }
    }

    #[test]
    fn by_name_prefixes_with_dot() {
        let aggregator = Aggregator::new(PrefixStrategy::ByName);
        let up = upstream("alpha", vec![tool("search")], vec![]);
        aggregator.rebuild(&[up]);
        let found = aggregator.find_tool("alpha.search").unwrap();
        assert_eq!(found.owner_upstream, "alpha");
        assert_eq!(found.original, "search");
    }

    #[test]
    fn underscore_flattened_once() {
        let aggregator = Aggregator::new(PrefixStrategy::ByName);
        let up = upstream("serverA", vec![tool("toolX")], vec![]);
        aggregator.rebuild(&[up]);
        let found = aggregator.find_tool("serverA_toolX").unwrap();
        assert_eq!(found.prefixed, "serverA.toolX");
    }

    #[test]
    fn falls_back_to_original_name() {
        let aggregator = Aggregator::new(PrefixStrategy::ByName);
        let up = upstream("alpha", vec![tool("search")], vec![]);
        aggregator.rebuild(&[up]);
        let found = aggregator.find_tool("search").unwrap();
        assert_eq!(found.owner_upstream, "alpha");
    }

    #[test]
    fn collisions_recorded_and_first_wins() {
        let aggregator = Aggregator::new(PrefixStrategy::None);
        let a = upstream("alpha", vec![tool("search")], vec![]);
        let b = upstream("beta", vec![tool("search")], vec![]);
        aggregator.rebuild(&[a, b]);
        assert_eq!(aggregator.tool_conflicts().get("search"), Some(&2));
        // PrefixStrategy::None means both map to the same prefixed key; first insert wins.
        let found = aggregator.find_tool("search").unwrap();
        assert_eq!(found.owner_upstream, "alpha");
    }

    #[test]
    fn disconnected_upstreams_are_skipped() {
        let aggregator = Aggregator::new(PrefixStrategy::ByName);
        let up = upstream("alpha", vec![tool("search")], vec![]);
        up.set_status(UpstreamStatus::Disconnected);
        aggregator.rebuild(&[up]);
        assert!(aggregator.list_tools().is_empty());
    }

    #[test]
    fn short_name_prefix_uses_first_hyphen_segment() {
        let aggregator = Aggregator::new(PrefixStrategy::ShortName);
        let up = upstream("weather-service", vec![tool("forecast")], vec![]);
        aggregator.rebuild(&[up]);
        let found = aggregator.find_tool("weather.forecast").unwrap();
        assert_eq!(found.original, "forecast");
    }

    #[test]
    fn resource_uri_uses_scheme_separator() {
        let aggregator = Aggregator::new(PrefixStrategy::ByName);
        let resource = Resource {
            uri: "file.txt".to_string(),
            name: "file".to_string(),
            description: None,
            mime_type: None,
        };
        let up = upstream("alpha", vec![], vec![resource]);
        aggregator.rebuild(&[up]);
        let found = aggregator.find_resource("alpha://file.txt").unwrap();
        assert_eq!(found.original, "file.txt");
    }
}
