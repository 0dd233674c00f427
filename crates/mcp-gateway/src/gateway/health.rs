//! Health-check loop: one task per gateway instance, fanning out `ping`s in
//! parallel bounded by per-upstream single-flight, scheduling reconnects on
//! failure (spec §4.3 "Health checking", §5 "Health loop"/"Backoff").

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::Gateway;
use crate::model::{Upstream, UpstreamStatus};

/// Fixed backoff between gateway-level reconnect attempts (spec §5), distinct
/// from the transport's own exponential reconnect backoff.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

impl Gateway {
    /// Spawn the health-check loop. Callers hold the returned handle to abort
    /// it at shutdown.
    pub fn spawn_health_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gateway.settings().health_check_interval());
            loop {
                ticker.tick().await;
                gateway.run_health_pass().await;
            }
        })
    }

    async fn run_health_pass(&self) {
        let names = self.list_upstream_names();
        let checks = names.into_iter().map(|name| self.health_check_one(name));
        futures::future::join_all(checks).await;
    }

    async fn health_check_one(&self, name: String) {
        let Some(upstream) = self.upstream(&name) else { return };
        if upstream.status() != UpstreamStatus::Connected {
            return;
        }
        if upstream.health_check_in_flight.swap(true, Ordering::SeqCst) {
            return;
        }

        let Some(transport) = self.transport(&name) else {
            upstream.health_check_in_flight.store(false, Ordering::SeqCst);
            return;
        };

        let result = transport.health_check().await;
        upstream.health_check_in_flight.store(false, Ordering::SeqCst);

        if let Err(e) = result {
            warn!(upstream = %name, error = %e, "health check failed");
            self.on_health_failure(&name, &upstream);
        }
    }

    fn on_health_failure(&self, name: &str, upstream: &Arc<Upstream>) {
        let retries = upstream.retry_count.fetch_add(1, Ordering::SeqCst) + 1;
        if retries < self.settings().max_retries {
            upstream.set_status(UpstreamStatus::Reconnecting);
            self.emit(name, UpstreamStatus::Reconnecting);
            self.schedule_reconnect(name.to_string());
        } else {
            upstream.set_status(UpstreamStatus::Failed);
            self.emit(name, UpstreamStatus::Failed);
            self.rebuild_aggregator();
        }
    }

    /// Out-of-band reconnect task: wait the fixed backoff, then re-run `start`.
    fn schedule_reconnect(&self, name: String) {
        let Some(gateway) = self.arc_handle() else { return };
        tokio::spawn(async move {
            tokio::time::sleep(RECONNECT_BACKOFF).await;
            if let Err(e) = gateway.reconnect(&name).await {
                warn!(upstream = %name, error = %e, "scheduled reconnect failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewaySettings, UpstreamConfig, UpstreamTransportConfig};
    use std::collections::HashMap;

    fn stdio_config(name: &str) -> UpstreamConfig {
        UpstreamConfig {
            name: name.to_string(),
            transport: UpstreamTransportConfig::Stdio {
                command: "echo".to_string(),
                args: vec![],
                env: HashMap::new(),
            },
            enabled: false,
            timeout_seconds: 60,
            max_retries: 2,
            source: "config".to_string(),
        }
    }

    #[tokio::test]
    async fn non_connected_upstreams_are_skipped() {
        let gateway = Gateway::new(GatewaySettings::default());
        let mut configs = HashMap::new();
        configs.insert("alpha".to_string(), stdio_config("alpha"));
        gateway.load_upstreams(configs);

        gateway.health_check_one("alpha".to_string()).await;
        let upstream = gateway.upstream("alpha").unwrap();
        assert_eq!(upstream.retry_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_below_max_retries_goes_reconnecting() {
        let gateway = Gateway::new(GatewaySettings::default());
        let mut configs = HashMap::new();
        configs.insert("alpha".to_string(), stdio_config("alpha"));
        gateway.load_upstreams(configs);
        let upstream = gateway.upstream("alpha").unwrap();
        upstream.set_status(UpstreamStatus::Connected);

        gateway.on_health_failure("alpha", &upstream);
        assert_eq!(upstream.status(), UpstreamStatus::Reconnecting);
    }

    #[tokio::test]
    async fn failure_past_max_retries_goes_failed() {
        let mut settings = GatewaySettings::default();
        settings.max_retries = 1;
        let gateway = Gateway::new(settings);
        let mut configs = HashMap::new();
        configs.insert("alpha".to_string(), stdio_config("alpha"));
        gateway.load_upstreams(configs);
        let upstream = gateway.upstream("alpha").unwrap();
        upstream.set_status(UpstreamStatus::Connected);

        gateway.on_health_failure("alpha", &upstream);
        assert_eq!(upstream.status(), UpstreamStatus::Failed);
    }
}
