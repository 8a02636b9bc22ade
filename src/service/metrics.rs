use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::service::routes::Endpoint;

/// Latency bucket thresholds in milliseconds
pub const LATENCY_BUCKETS: [u64; 5] = [1, 5, 10, 50, 100];

/// Number of latency buckets (5 thresholds + 1 overflow bucket)
pub const NUM_LATENCY_BUCKETS: usize = 6;

/// Lock-free metrics for a single HTTP endpoint
pub struct EndpointMetrics {
    /// Total number of requests
    pub requests: AtomicU64,
    /// Number of requests that resulted in errors
    pub errors: AtomicU64,
    /// Latency buckets: <1ms, <5ms, <10ms, <50ms, <100ms, ≥100ms
    pub latency_buckets: [AtomicU64; NUM_LATENCY_BUCKETS],
    /// Responses by HTTP status code
    pub responses: DashMap<u16, u64>,
}

impl EndpointMetrics {
    /// Creates a new `EndpointMetrics` instance with all counters at zero
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            latency_buckets: Default::default(),
            responses: DashMap::new(),
        }
    }

    /// Count an incoming request
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished request with its status and latency
    #[allow(clippy::arithmetic_side_effects)]
    pub fn record_response(&self, status: u16, latency: Duration) {
        if status >= 400 {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        *self.responses.entry(status).or_insert(0) += 1;
        if let Some(bucket) = self.latency_buckets.get(Self::latency_bucket(latency)) {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Determine which latency bucket a duration falls into
    /// Returns index 0-5 for buckets: <1ms, <5ms, <10ms, <50ms, <100ms, ≥100ms
    fn latency_bucket(latency: Duration) -> usize {
        let ms = u64_millis(latency.as_millis());
        LATENCY_BUCKETS
            .iter()
            .position(|&threshold| ms < threshold)
            .unwrap_or(NUM_LATENCY_BUCKETS - 1)
    }

    /// Get a snapshot of current metrics
    #[must_use]
    pub fn snapshot(&self) -> EndpointMetricsSnapshot {
        EndpointMetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            latency_buckets: std::array::from_fn(|i| {
                self.latency_buckets[i].load(Ordering::Relaxed)
            }),
            responses: self
                .responses
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
        }
    }
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of endpoint metrics (non-atomic, for serialization)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointMetricsSnapshot {
    /// Total number of requests
    pub requests: u64,
    /// Number of requests that resulted in errors
    pub errors: u64,
    /// Latency bucket counts: <1ms, <5ms, <10ms, <50ms, <100ms, ≥100ms
    pub latency_buckets: [u64; NUM_LATENCY_BUCKETS],
    /// Response counts keyed by HTTP status
    pub responses: BTreeMap<u16, u64>,
}

/// Metrics for one hub instance (one backend log)
pub struct HubInstanceMetrics {
    /// Set once the hub has been constructed
    pub known: AtomicBool,
    /// Tree size of the last STH served
    pub last_sth_tree_size: AtomicU64,
    /// Time the last STH was served, in ms since the epoch
    pub last_sth_timestamp_ms: AtomicI64,
    endpoints: [EndpointMetrics; Endpoint::COUNT],
}

impl HubInstanceMetrics {
    fn new() -> Self {
        Self {
            known: AtomicBool::new(false),
            last_sth_tree_size: AtomicU64::new(0),
            last_sth_timestamp_ms: AtomicI64::new(0),
            endpoints: Default::default(),
        }
    }

    /// Metrics for one endpoint
    #[must_use]
    pub fn endpoint(&self, endpoint: Endpoint) -> &EndpointMetrics {
        &self.endpoints[endpoint as usize]
    }

    /// Record the STH most recently served
    pub fn record_sth(&self, tree_size: u64) {
        self.last_sth_tree_size.store(tree_size, Ordering::Relaxed);
        self.last_sth_timestamp_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> HubMetricsSnapshot {
        HubMetricsSnapshot {
            known: self.known.load(Ordering::Relaxed),
            last_sth_tree_size: self.last_sth_tree_size.load(Ordering::Relaxed),
            last_sth_timestamp_ms: self.last_sth_timestamp_ms.load(Ordering::Relaxed),
            endpoints: Endpoint::ALL
                .iter()
                .map(|ep| (ep.path().to_string(), self.endpoint(*ep).snapshot()))
                .collect(),
        }
    }
}

/// Snapshot of one hub's metrics (for serialization)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubMetricsSnapshot {
    pub known: bool,
    pub last_sth_tree_size: u64,
    pub last_sth_timestamp_ms: i64,
    /// Per-endpoint metrics keyed by endpoint path
    pub endpoints: HashMap<String, EndpointMetricsSnapshot>,
}

/// Process-wide metrics registry.
///
/// Built once at startup and handed to every hub, so tests can use a fresh
/// registry per hub.
#[derive(Default)]
pub struct HubMetrics {
    hubs: DashMap<i64, Arc<HubInstanceMetrics>>,
}

impl HubMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the metrics for the hub serving `log_id`
    #[must_use]
    pub fn hub(&self, log_id: i64) -> Arc<HubInstanceMetrics> {
        self.hubs
            .entry(log_id)
            .or_insert_with(|| Arc::new(HubInstanceMetrics::new()))
            .clone()
    }

    /// Snapshot of every hub, keyed by log id
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, HubMetricsSnapshot> {
        self.hubs
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().snapshot()))
            .collect()
    }
}

/// Safely converts u128 milliseconds to u64, capping at `u64::MAX`
///
/// This is used for timing metrics where u64 is expected.
pub(crate) fn u64_millis(millis: u128) -> u64 {
    u64::try_from(millis).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        assert_eq!(EndpointMetrics::latency_bucket(Duration::from_micros(500)), 0);
        assert_eq!(EndpointMetrics::latency_bucket(Duration::from_millis(1)), 1);
        assert_eq!(EndpointMetrics::latency_bucket(Duration::from_millis(9)), 2);
        assert_eq!(EndpointMetrics::latency_bucket(Duration::from_millis(49)), 3);
        assert_eq!(EndpointMetrics::latency_bucket(Duration::from_millis(99)), 4);
        assert_eq!(EndpointMetrics::latency_bucket(Duration::from_secs(3)), 5);
    }

    #[test]
    fn test_record_responses() {
        let metrics = EndpointMetrics::new();
        metrics.record_request();
        metrics.record_response(200, Duration::from_millis(2));
        metrics.record_request();
        metrics.record_response(404, Duration::from_millis(2));
        metrics.record_request();
        metrics.record_response(404, Duration::from_millis(200));

        let snap = metrics.snapshot();
        assert_eq!(snap.requests, 3);
        assert_eq!(snap.errors, 2);
        assert_eq!(snap.responses.get(&200), Some(&1));
        assert_eq!(snap.responses.get(&404), Some(&2));
        assert_eq!(snap.latency_buckets, [0, 2, 0, 0, 0, 1]);
    }

    #[test]
    fn test_hub_registry_reuses_instances() {
        let registry = HubMetrics::new();
        registry.hub(7).record_sth(42);
        assert_eq!(registry.hub(7).last_sth_tree_size.load(Ordering::Relaxed), 42);
        assert!(registry.snapshot().contains_key("7"));
        assert_eq!(registry.hub(8).last_sth_tree_size.load(Ordering::Relaxed), 0);
    }
}
