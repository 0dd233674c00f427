//! Metrics projection: per-upstream snapshots plus gateway-wide totals,
//! weighted by request count (spec §4.3 "Metrics").

use std::collections::HashMap;

use crate::model::StatisticsSnapshot;

use super::Gateway;

#[derive(Debug, Clone)]
pub struct GatewayMetrics {
    pub per_upstream: HashMap<String, StatisticsSnapshot>,
    pub total: StatisticsSnapshot,
}

impl Gateway {
    pub fn metrics(&self) -> GatewayMetrics {
        let mut per_upstream = HashMap::new();
        let mut total = StatisticsSnapshot {
            total: 0,
            successful: 0,
            failed: 0,
            avg_response_time_ms: 0.0,
            last_request_at_epoch_ms: None,
        };

        for name in self.list_upstream_names() {
            let Some(upstream) = self.upstream(&name) else { continue };
            let snapshot = upstream.stats.snapshot();
            total = total + snapshot;
            per_upstream.insert(name, snapshot);
        }

        GatewayMetrics { per_upstream, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewaySettings, UpstreamConfig, UpstreamTransportConfig};
    use std::collections::HashMap as StdHashMap;
    use std::time::Duration;

    fn settings() -> GatewaySettings {
        GatewaySettings::default()
    }

    fn stdio_config(name: &str) -> UpstreamConfig {
        UpstreamConfig {
            name: name.to_string(),
            transport: UpstreamTransportConfig::Stdio {
                command: "echo".to_string(),
                args: vec![],
                env: StdHashMap::new(),
            },
            enabled: false,
            timeout_seconds: 60,
            max_retries: 3,
            source: "config".to_string(),
        }
    }

    #[tokio::test]
    async fn totals_sum_across_upstreams() {
        let gateway = Gateway::new(settings());
        let mut configs = HashMap::new();
        configs.insert("alpha".to_string(), stdio_config("alpha"));
        configs.insert("beta".to_string(), stdio_config("beta"));
        gateway.load_upstreams(configs);

        gateway.upstream("alpha").unwrap().stats.record(true, Duration::from_millis(100), 1);
        gateway.upstream("beta").unwrap().stats.record(true, Duration::from_millis(300), 2);

        let metrics = gateway.metrics();
        assert_eq!(metrics.total.total, 2);
        assert!((metrics.total.avg_response_time_ms - 200.0).abs() < 0.01);
        assert_eq!(metrics.per_upstream.len(), 2);
    }
}
