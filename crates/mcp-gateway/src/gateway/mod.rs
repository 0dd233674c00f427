//! Gateway core: owns the upstream set and the aggregator; exposes
//! `execute_tool`, `access_resource`, `list`, `status`, `metrics`, and the
//! lifecycle operations `enable_upstream`/`disable_upstream`/`refresh_discovery`/`reconnect`.
//!
//! Grounded on the teacher's `proxy/service.rs` (a central owning struct
//! wiring backend + router + metrics) generalized from one backend to a
//! `DashMap` of upstreams, per spec §4.3.

pub mod discovery;
pub mod health;
pub mod routing;
pub mod stats;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use tracing::info;

use crate::aggregator::Aggregator;
use crate::config::{GatewaySettings, UpstreamConfig, UpstreamTransportConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::model::{Upstream, UpstreamStatus};
use crate::transport::http_sse::{HttpTransport, HttpTransportConfig};
use crate::transport::stdio::{StdioTransport, StdioTransportConfig};
use crate::transport::{ListChangedCallback, UnifiedTransport};

/// Status-change notification, the seam the out-of-scope management UI's
/// push channel would subscribe to (spec §4.3).
#[derive(Debug, Clone)]
pub struct ServerEvent {
    pub upstream: String,
    pub status: UpstreamStatus,
}

pub type EventCallback = Arc<dyn Fn(ServerEvent) + Send + Sync>;

/// Owns upstreams and the aggregator; the only process-wide singleton the
/// gateway needs (spec §9, "global mutable state").
pub struct Gateway {
    upstreams: DashMap<String, Arc<Upstream>>,
    transports: DashMap<String, Arc<dyn UnifiedTransport>>,
    aggregator: Aggregator,
    settings: GatewaySettings,
    callbacks: parking_lot::RwLock<Vec<EventCallback>>,
    self_ref: OnceLock<Weak<Gateway>>,
    /// Monotonic counter stamped onto `Upstream::enable_sequence` on first
    /// successful connect, so enable order survives reconnects.
    enable_counter: std::sync::atomic::AtomicU64,
}

impl Gateway {
    pub fn new(settings: GatewaySettings) -> Arc<Self> {
        let strategy = settings.prefix_strategy;
        let this = Arc::new(Self {
            upstreams: DashMap::new(),
            transports: DashMap::new(),
            aggregator: Aggregator::new(strategy),
            settings,
            callbacks: parking_lot::RwLock::new(Vec::new()),
            self_ref: OnceLock::new(),
            enable_counter: std::sync::atomic::AtomicU64::new(0),
        });
        let _ = this.self_ref.set(Arc::downgrade(&this));
        this
    }

    fn arc_handle(&self) -> Option<Arc<Gateway>> {
        self.self_ref.get().and_then(Weak::upgrade)
    }

    pub fn on_event(&self, callback: EventCallback) {
        self.callbacks.write().push(callback);
    }

    fn emit(&self, upstream: &str, status: UpstreamStatus) {
        let event = ServerEvent {
            upstream: upstream.to_string(),
            status,
        };
        for cb in self.callbacks.read().iter() {
            cb(event.clone());
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn upstream(&self, name: &str) -> Option<Arc<Upstream>> {
        self.upstreams.get(name).map(|e| e.value().clone())
    }

    pub fn transport(&self, name: &str) -> Option<Arc<dyn UnifiedTransport>> {
        self.transports.get(name).map(|e| e.value().clone())
    }

    pub fn list_upstream_names(&self) -> Vec<String> {
        self.upstreams.iter().map(|e| e.key().clone()).collect()
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Upstreams ordered by enable sequence, so aggregator rebuilds resolve a
    /// tool/resource-name collision in favor of whichever upstream was
    /// enabled first, not whichever sorts first alphabetically (spec §8).
    /// Never-enabled upstreams (sequence 0) sort last, by name among themselves.
    fn ordered_upstreams(&self) -> Vec<Arc<Upstream>> {
        let mut all: Vec<Arc<Upstream>> = self.upstreams.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| {
            let (sa, sb) = (
                a.enable_sequence.load(Ordering::SeqCst),
                b.enable_sequence.load(Ordering::SeqCst),
            );
            match (sa, sb) {
                (0, 0) => a.name().cmp(b.name()),
                (0, _) => std::cmp::Ordering::Greater,
                (_, 0) => std::cmp::Ordering::Less,
                _ => sa.cmp(&sb),
            }
        });
        all
    }

    pub fn rebuild_aggregator(&self) {
        self.aggregator.rebuild(&self.ordered_upstreams());
    }

    /// Materialize configured/discovered upstreams as `Disconnected`. No upstream
    /// is started here (spec §4.3, "Discovery vs activation").
    pub fn load_upstreams(&self, configs: HashMap<String, UpstreamConfig>) {
        for (name, config) in configs {
            self.upstreams.insert(name, Arc::new(Upstream::new(config)));
        }
    }

    fn build_transport(&self, name: &str, config: &UpstreamConfig) -> GatewayResult<Arc<dyn UnifiedTransport>> {
        let weak_self = self.self_ref.get().cloned().unwrap_or_else(Weak::new);
        let on_list_changed: ListChangedCallback = Arc::new(move |_upstream: &str| {
            if let Some(gateway) = weak_self.upgrade() {
                gateway.rebuild_aggregator();
            }
        });

        match &config.transport {
            UpstreamTransportConfig::Stdio { command, args, env } => Ok(StdioTransport::spawn(
                StdioTransportConfig {
                    upstream: name.to_string(),
                    command: command.clone(),
                    args: args.clone(),
                    env: env.clone(),
                },
                on_list_changed,
            ) as Arc<dyn UnifiedTransport>),
            UpstreamTransportConfig::Network {
                url,
                transport,
                sse_endpoint,
                messages_endpoint,
            } => HttpTransport::spawn(
                HttpTransportConfig {
                    upstream: name.to_string(),
                    base_url: url.clone(),
                    kind: *transport,
                    sse_endpoint: sse_endpoint.clone(),
                    messages_endpoint: messages_endpoint.clone(),
                    max_retries: config.max_retries,
                },
                on_list_changed,
            )
            .map(|t| t as Arc<dyn UnifiedTransport>),
        }
    }

    /// `enable_upstream(name)` (spec §4.3): start the transport; on success
    /// store it and trigger an aggregator rebuild. Failure leaves the upstream
    /// `Failed` but returns the structured error.
    pub async fn enable_upstream(&self, name: &str) -> GatewayResult<()> {
        let upstream = self.upstream(name).ok_or_else(|| GatewayError::upstream_not_found(name))?;
        upstream.set_status(UpstreamStatus::Connecting);

        let transport = match self.build_transport(name, &upstream.config) {
            Ok(t) => t,
            Err(e) => {
                upstream.set_status(UpstreamStatus::Failed);
                upstream.set_error(e.to_string());
                self.emit(name, UpstreamStatus::Failed);
                return Err(e);
            }
        };

        match transport.start().await {
            Ok(()) => {
                *upstream.tools.write() = transport.list_tools().await.unwrap_or_default();
                *upstream.resources.write() = transport.list_resources().await.unwrap_or_default();
                *upstream.framework.write() = transport.framework();
                upstream.set_status(UpstreamStatus::Connected);
                upstream.retry_count.store(0, Ordering::SeqCst);
                if upstream.enable_sequence.load(Ordering::SeqCst) == 0 {
                    let seq = self.enable_counter.fetch_add(1, Ordering::SeqCst) + 1;
                    upstream.enable_sequence.store(seq, Ordering::SeqCst);
                }
                self.transports.insert(name.to_string(), transport);
                self.rebuild_aggregator();
                self.emit(name, UpstreamStatus::Connected);
                info!(upstream = name, "upstream enabled");
                Ok(())
            }
            Err(e) => {
                upstream.set_status(UpstreamStatus::Failed);
                upstream.set_error(e.to_string());
                self.emit(name, UpstreamStatus::Failed);
                Err(e)
            }
        }
    }

    /// `disable_upstream(name)` (spec §4.3).
    pub async fn disable_upstream(&self, name: &str) -> GatewayResult<()> {
        let upstream = self.upstream(name).ok_or_else(|| GatewayError::upstream_not_found(name))?;
        if let Some((_, transport)) = self.transports.remove(name) {
            let _ = transport.stop().await;
        }
        upstream.set_status(UpstreamStatus::Disconnected);
        upstream.set_error("disabled by user");
        self.rebuild_aggregator();
        self.emit(name, UpstreamStatus::Disconnected);
        Ok(())
    }

    /// `reconnect(name)` (spec §4.3): tear down and re-run `start`; on success
    /// rebuild the aggregator and reset `retry_count`.
    pub async fn reconnect(&self, name: &str) -> GatewayResult<()> {
        if let Some((_, transport)) = self.transports.remove(name) {
            let _ = transport.stop().await;
        }
        self.enable_upstream(name).await
    }
}
