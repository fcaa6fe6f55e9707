use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::orchestrator::task::Tier;

/// Per-run request metrics, shared by every tier
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// In-memory metrics store
    metrics: Arc<Mutex<Metrics>>,
}

/// Metrics data structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Metrics {
    /// Start time of the metrics collection
    pub start_time: DateTime<Utc>,

    /// Per-tier request counters
    pub tiers: BTreeMap<Tier, TierMetrics>,

    /// Rendering batches sent to any endpoint
    pub render_batches: usize,

    /// Rendering batches that failed as a whole
    pub failed_render_batches: usize,

    /// Rendering endpoints retired during the run
    pub retired_endpoints: Vec<String>,

    /// HTTP status code counts
    pub status_codes: BTreeMap<u16, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TierMetrics {
    pub requests: usize,
    /// Attempts that did not produce sufficient content
    pub failures: usize,
    pub bytes: usize,
    pub total_ms: u64,
    pub avg_ms: f64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let metrics = Metrics {
            start_time: Utc::now(),
            ..Default::default()
        };

        Self {
            metrics: Arc::new(Mutex::new(metrics)),
        }
    }

    /// Record one attempt at one tier
    pub async fn record_request(
        &self,
        tier: Tier,
        success: bool,
        duration_ms: u64,
        status_code: Option<u16>,
        bytes: usize,
    ) {
        let mut metrics = self.metrics.lock().await;

        let entry = metrics.tiers.entry(tier).or_default();
        entry.requests += 1;
        if !success {
            entry.failures += 1;
        }
        entry.bytes += bytes;
        entry.total_ms += duration_ms;
        entry.avg_ms = entry.total_ms as f64 / entry.requests as f64;

        // Record status code if available
        if let Some(code) = status_code {
            *metrics.status_codes.entry(code).or_default() += 1;
        }
    }

    /// Record a completed rendering batch
    pub async fn record_render_batch(&self, success: bool) {
        let mut metrics = self.metrics.lock().await;
        metrics.render_batches += 1;
        if !success {
            metrics.failed_render_batches += 1;
        }
    }

    pub async fn record_endpoint_retired(&self, endpoint: &str) {
        let mut metrics = self.metrics.lock().await;
        metrics.retired_endpoints.push(endpoint.to_string());
    }

    /// Start timing a request
    pub fn start_timer(&self) -> RequestTimer {
        RequestTimer {
            start: Instant::now(),
        }
    }

    /// Get all metrics
    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }
}

/// Request timer for measuring request durations
pub struct RequestTimer {
    /// Start time of the request
    start: Instant,
}

impl RequestTimer {
    /// End timing and get the duration in milliseconds
    pub fn end(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_request_per_tier() {
        let collector = MetricsCollector::new();
        collector
            .record_request(Tier::Static, true, 100, Some(200), 2048)
            .await;
        collector
            .record_request(Tier::Static, false, 300, Some(404), 10)
            .await;
        collector
            .record_request(Tier::Decodo, false, 50, None, 0)
            .await;
        collector.record_render_batch(false).await;

        let metrics = collector.get_metrics().await;
        let statics = &metrics.tiers[&Tier::Static];
        assert_eq!(statics.requests, 2);
        assert_eq!(statics.failures, 1);
        assert_eq!(statics.bytes, 2058);
        assert_eq!(statics.avg_ms, 200.0);
        assert_eq!(metrics.tiers[&Tier::Decodo].failures, 1);
        assert_eq!(metrics.status_codes[&404], 1);
        assert_eq!(metrics.render_batches, 1);
        assert_eq!(metrics.failed_render_batches, 1);
    }
}
