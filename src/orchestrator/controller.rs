use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::browser::dispatcher::RenderDispatcher;
use crate::browser::remote::{RemoteRenderService, RenderService};
use crate::cli::config::{ConfigOverrides, RunConfiguration, MAX_BATCH_URLS};
use crate::error::FetchError;
use crate::fetch::static_xhr::StaticXhrPool;
use crate::fetch::transport::{HttpTransport, ReqwestTransport};
use crate::orchestrator::aggregator::{self, BatchResponse};
use crate::orchestrator::run::BatchRun;
use crate::orchestrator::task::{FetchAttemptResult, Tier, UrlOutcome};
use crate::proxy::client::{DecodoClient, ProxyService};
use crate::proxy::fetcher::ProxyFetcher;
use crate::storage::raw::{OutputSink, RawStorage};
use crate::utils::MetricsCollector;

/// A batch of URLs plus optional per-request configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub config: Option<ConfigOverrides>,
}

impl BatchRequest {
    pub fn new(urls: Vec<String>) -> Self {
        Self { urls, config: None }
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.config = Some(overrides);
        self
    }
}

/// Per-run tier implementations
struct TierSet {
    static_xhr: StaticXhrPool,
    renderer: RenderDispatcher,
    proxy: ProxyFetcher,
}

impl TierSet {
    fn attempts(
        &self,
        tier: Tier,
        urls: Vec<String>,
        config: Arc<RunConfiguration>,
    ) -> BoxStream<'static, FetchAttemptResult> {
        match tier {
            Tier::Static | Tier::Xhr => self.static_xhr.attempt(tier, urls, config),
            Tier::CustomJs => self.renderer.attempt(urls, config),
            Tier::Decodo => self.proxy.attempt(urls, config),
        }
    }
}

/// Drives a batch through the tiers, cheapest first.
///
/// A URL leaves the pipeline at the first tier whose content the classifier
/// accepts; whatever is left after the last tier has failed. The orchestrator
/// is the only writer of the run state.
#[derive(Clone)]
pub struct FetchOrchestrator {
    defaults: RunConfiguration,
    transport: Arc<dyn HttpTransport>,
    renderer: Arc<dyn RenderService>,
    proxy: Arc<dyn ProxyService>,
    sink: Option<Arc<dyn OutputSink>>,
}

impl FetchOrchestrator {
    /// Create an orchestrator backed by the real HTTP services
    pub fn new(defaults: RunConfiguration) -> Result<Self, FetchError> {
        Ok(Self::with_services(
            defaults,
            Arc::new(ReqwestTransport::new()?),
            Arc::new(RemoteRenderService::new()?),
            Arc::new(DecodoClient::new()?),
        ))
    }

    pub fn with_services(
        defaults: RunConfiguration,
        transport: Arc<dyn HttpTransport>,
        renderer: Arc<dyn RenderService>,
        proxy: Arc<dyn ProxyService>,
    ) -> Self {
        Self {
            defaults,
            transport,
            renderer,
            proxy,
            sink: None,
        }
    }

    /// Use this sink instead of the one `output.save_outputs` would build
    pub fn with_output_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Process a batch to completion
    pub async fn run(&self, request: BatchRequest) -> Result<BatchResponse, FetchError> {
        self.run_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Process a batch, stopping early if `cancel` fires or the run deadline passes.
    ///
    /// Only configuration problems are returned as errors; everything that goes
    /// wrong for an individual URL ends up in that URL's outcome.
    pub async fn run_with_cancellation(
        &self,
        request: BatchRequest,
        cancel: CancellationToken,
    ) -> Result<BatchResponse, FetchError> {
        let config = Arc::new(self.resolve_config(&request)?);
        let metrics = MetricsCollector::new();
        let mut run = BatchRun::new(request.urls, config.clone());

        info!(
            "Run {} started: {} URLs ({} unique)",
            run.run_id,
            run.inputs().len(),
            run.pending_urls().len()
        );

        let tiers = TierSet {
            static_xhr: StaticXhrPool::new(self.transport.clone(), &config, metrics.clone()),
            renderer: RenderDispatcher::new(self.renderer.clone(), &config, metrics.clone()),
            proxy: ProxyFetcher::new(self.proxy.clone(), &config, metrics.clone()),
        };
        let sink = self
            .sink
            .clone()
            .or_else(|| RawStorage::create(&config.output));

        let deadline_at = config
            .run_deadline()
            .and_then(|d| Instant::now().checked_add(d));
        let deadline = async move {
            match deadline_at {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let mut interrupted: Option<&'static str> = None;
        let mut accepted: Vec<String> = Vec::new();

        'tiers: for tier in Tier::ESCALATION {
            let pending = run.pending_urls();
            if pending.is_empty() {
                debug!("Nothing left to fetch, skipping remaining tiers");
                break;
            }
            if !tier.is_enabled(&config) {
                info!("Tier {} disabled, skipping {} URLs", tier, pending.len());
                continue;
            }

            info!("Tier {}: {} URLs", tier, pending.len());
            run.begin_tier(tier, pending.len());
            let mut attempts = tiers.attempts(tier, pending, config.clone());

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        interrupted = Some("run cancelled by caller");
                        break 'tiers;
                    }
                    _ = &mut deadline => {
                        interrupted = Some("run deadline exceeded");
                        break 'tiers;
                    }
                    next = attempts.next() => {
                        let Some(attempt) = next else {
                            break;
                        };
                        if let Some(outcome) = run.record(&attempt) {
                            if outcome.is_success() {
                                accepted.push(outcome.url.clone());
                            }
                        }
                    }
                }
            }
        }

        if let Some(reason) = interrupted {
            warn!("Run {} interrupted: {}", run.run_id, reason);
            run.cancel_pending(reason);
        }

        run.finish(metrics.get_metrics().await);

        // Written once the tiers are done so a slow sink never delays cancellation
        if let Some(sink) = &sink {
            let writes = accepted
                .iter()
                .filter_map(|url| run.outcome(url))
                .map(|outcome| store_output(sink.as_ref(), outcome));
            futures::future::join_all(writes).await;
        }

        let response = aggregator::into_response(&run);

        info!(
            "Run {} finished: {}/{} succeeded in {:.2}s",
            response.run_id,
            response.summary.success,
            response.summary.total,
            response.summary.total_time
        );

        Ok(response)
    }

    /// Validate the request and merge its overrides onto the defaults
    fn resolve_config(&self, request: &BatchRequest) -> Result<RunConfiguration, FetchError> {
        let count = request.urls.len();
        if count == 0 || count > MAX_BATCH_URLS {
            return Err(FetchError::config(format!(
                "batch must contain between 1 and {} URLs, got {}",
                MAX_BATCH_URLS, count
            )));
        }

        let overrides = request.config.clone().unwrap_or_default();
        self.defaults.merged(&overrides)
    }
}

async fn store_output(sink: &dyn OutputSink, outcome: &UrlOutcome) {
    if let Err(e) = sink.store(outcome).await {
        error!("Failed to save output for {}: {:#}", outcome.url, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_request_rejects_unknown_fields() {
        let parsed: Result<BatchRequest, _> =
            serde_json::from_str(r#"{"urls": ["https://a.test"], "priority": 1}"#);
        assert!(parsed.is_err());

        let parsed: BatchRequest = serde_json::from_str(
            r#"{"urls": ["https://a.test"], "config": {"custom_js_batch_size": 10}}"#,
        )
        .unwrap();
        assert_eq!(parsed.config.unwrap().custom_js_batch_size, Some(10));
    }

    #[test]
    fn test_batch_request_rejects_unknown_override_keys() {
        let parsed: Result<BatchRequest, _> = serde_json::from_str(
            r#"{"urls": ["https://a.test"], "config": {"parallel_mode": true}}"#,
        );
        assert!(parsed.is_err());
    }
}
