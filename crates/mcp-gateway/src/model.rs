//! Core data model shared by the aggregator, gateway core, and endpoint.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::UpstreamConfig;

/// Runtime connection state of an upstream, per the state machine in the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Heuristic classification of an upstream's MCP implementation family.
///
/// Affects only defaults (timeouts, argument encoding, response unwrapping) —
/// never correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Standard,
    Fast,
    Unknown,
}

/// A tool exposed by an upstream, with its raw (unprefixed) name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A resource exposed by an upstream, with its raw (unprefixed) uri.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

/// Gateway-assigned mapping entry for a tool in the aggregated namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedTool {
    pub original: String,
    pub prefixed: String,
    pub owner_upstream: String,
    pub description: String,
    pub schema: Value,
}

/// Gateway-assigned mapping entry for a resource in the aggregated namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResource {
    pub original: String,
    pub prefixed: String,
    pub owner_upstream: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

/// Per-upstream request statistics, updated with a rolling average per spec §4.3.
#[derive(Debug, Default)]
pub struct Statistics {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    /// Average response time in milliseconds, stored as fixed-point (x1000) for atomic updates.
    avg_response_time_us: AtomicU64,
    last_request_at_epoch_ms: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of a call. `latency` is wall time spent in the upstream call.
    pub fn record(&self, success: bool, latency: Duration, now_epoch_ms: u64) {
        let n = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        let sample_us = latency.as_micros() as u64;
        // new average = (old_avg * (n-1) + t) / n, per spec §4.3.
        let old_avg = self.avg_response_time_us.load(Ordering::Relaxed);
        let new_avg = if n <= 1 {
            sample_us
        } else {
            (old_avg.saturating_mul(n - 1).saturating_add(sample_us)) / n
        };
        self.avg_response_time_us.store(new_avg, Ordering::Relaxed);
        self.last_request_at_epoch_ms
            .store(now_epoch_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            avg_response_time_ms: self.avg_response_time_us.load(Ordering::Relaxed) as f64 / 1000.0,
            last_request_at_epoch_ms: {
                let v = self.last_request_at_epoch_ms.load(Ordering::Relaxed);
                if v == 0 { None } else { Some(v) }
            },
        }
    }
}

/// A serializable snapshot of [`Statistics`] at a point in time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StatisticsSnapshot {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub avg_response_time_ms: f64,
    pub last_request_at_epoch_ms: Option<u64>,
}

impl std::ops::Add for StatisticsSnapshot {
    type Output = StatisticsSnapshot;

    fn add(self, rhs: Self) -> Self::Output {
        let total = self.total + rhs.total;
        let weighted_avg = if total == 0 {
            0.0
        } else {
            (self.avg_response_time_ms * self.total as f64
                + rhs.avg_response_time_ms * rhs.total as f64)
                / total as f64
        };
        StatisticsSnapshot {
            total,
            successful: self.successful + rhs.successful,
            failed: self.failed + rhs.failed,
            avg_response_time_ms: weighted_avg,
            last_request_at_epoch_ms: self.last_request_at_epoch_ms.max(rhs.last_request_at_epoch_ms),
        }
    }
}

/// Runtime view of a single upstream: config plus discovered capabilities and health.
pub struct Upstream {
    pub config: UpstreamConfig,
    pub status: parking_lot::RwLock<UpstreamStatus>,
    pub capabilities: parking_lot::RwLock<Vec<String>>,
    pub tools: parking_lot::RwLock<Vec<Tool>>,
    pub resources: parking_lot::RwLock<Vec<Resource>>,
    pub framework: parking_lot::RwLock<Framework>,
    pub last_ping: parking_lot::RwLock<Option<Instant>>,
    pub last_error: parking_lot::RwLock<Option<String>>,
    pub retry_count: AtomicU32,
    pub stats: Statistics,
    /// Single-flight guard so an overrunning health check is never overlapped
    /// by the next tick (spec §5, "per-upstream single-flight").
    pub health_check_in_flight: AtomicBool,
    /// Position in the gateway-wide enable order, stamped once on the first
    /// successful `enable_upstream` and left untouched by later reconnects.
    /// Zero means never connected. Aggregator rebuilds sort upstreams by this
    /// so that a tool-name collision resolves to whichever upstream was
    /// enabled first, not whichever sorts first alphabetically (spec §8).
    pub enable_sequence: AtomicU64,
}

impl Upstream {
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            config,
            status: parking_lot::RwLock::new(UpstreamStatus::Disconnected),
            capabilities: parking_lot::RwLock::new(Vec::new()),
            tools: parking_lot::RwLock::new(Vec::new()),
            resources: parking_lot::RwLock::new(Vec::new()),
            framework: parking_lot::RwLock::new(Framework::Unknown),
            last_ping: parking_lot::RwLock::new(None),
            last_error: parking_lot::RwLock::new(None),
            retry_count: AtomicU32::new(0),
            stats: Statistics::new(),
            health_check_in_flight: AtomicBool::new(false),
            enable_sequence: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn status(&self) -> UpstreamStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: UpstreamStatus) {
        *self.status.write() = status;
    }

    pub fn set_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }
}
