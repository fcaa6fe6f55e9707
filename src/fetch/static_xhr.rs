use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::cli::config::{RunConfiguration, StaticXhrSettings};
use crate::content::ContentClassifier;
use crate::error::FetchError;
use crate::fetch::transport::{HttpRequest, HttpTransport};
use crate::orchestrator::task::{FetchAttemptResult, FetchRequest, Tier};
use crate::utils::MetricsCollector;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const STATIC_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const XHR_ACCEPT: &str = "application/json, text/html, */*";

/// Connection pool for the static and xhr tiers.
///
/// One pool is built per run and its permits are shared by both passes, so no
/// more than `static_xhr.concurrency` requests are ever in flight.
#[derive(Clone)]
pub struct StaticXhrPool {
    transport: Arc<dyn HttpTransport>,
    classifier: ContentClassifier,
    permits: Arc<Semaphore>,
    limit: usize,
    metrics: MetricsCollector,
}

impl StaticXhrPool {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        config: &RunConfiguration,
        metrics: MetricsCollector,
    ) -> Self {
        let limit = config.static_xhr.concurrency.max(1);
        Self {
            transport,
            classifier: ContentClassifier::new(config.content.clone()),
            permits: Arc::new(Semaphore::new(limit)),
            limit,
            metrics,
        }
    }

    /// Attempt every URL once at `tier`, yielding results as they complete
    pub fn attempt(
        &self,
        tier: Tier,
        urls: Vec<String>,
        config: Arc<RunConfiguration>,
    ) -> BoxStream<'static, FetchAttemptResult> {
        debug!("{} pass over {} URLs (limit {})", tier, urls.len(), self.limit);
        let pool = self.clone();

        stream::iter(urls)
            .map(move |url| {
                let pool = pool.clone();
                let request = FetchRequest::new(url, config.clone());
                async move { pool.fetch_one(tier, request).await }
            })
            .buffer_unordered(self.limit)
            .boxed()
    }

    async fn fetch_one(&self, tier: Tier, request: FetchRequest) -> FetchAttemptResult {
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return FetchAttemptResult::failed(
                    request.url,
                    tier,
                    FetchError::Cancelled("connection pool closed".to_string()),
                )
            }
        };

        let settings = &request.config.static_xhr;
        let timeout = settings.timeout();
        let http_request = build_request(tier, &request.url, settings);

        let timer = self.metrics.start_timer();
        let result = tokio::time::timeout(timeout, self.transport.execute(http_request)).await;
        let elapsed_ms = timer.end();

        let mut status = None;
        let attempt = match result {
            Err(_) => FetchAttemptResult::failed(&request.url, tier, FetchError::Timeout(timeout)),
            Ok(Err(e)) => FetchAttemptResult::failed(&request.url, tier, e),
            Ok(Ok(response)) => {
                status = Some(response.status);
                if response.is_success() {
                    FetchAttemptResult::classified(
                        &request.url,
                        tier,
                        Some(response.body),
                        &self.classifier,
                    )
                } else {
                    FetchAttemptResult::failed(
                        &request.url,
                        tier,
                        FetchError::rejected(response.status, format!("HTTP {}", response.status)),
                    )
                }
            }
        };

        debug!(
            "{} {} -> {} in {}ms",
            tier,
            request.url,
            attempt.verdict,
            elapsed_ms
        );
        self.metrics
            .record_request(tier, attempt.is_sufficient(), elapsed_ms, status, attempt.bytes())
            .await;

        attempt
    }
}

/// Browser-like GET for the static tier, data-request GET for the xhr tier
fn build_request(tier: Tier, url: &str, settings: &StaticXhrSettings) -> HttpRequest {
    let request = HttpRequest::get(url, settings.timeout())
        .header("User-Agent", BROWSER_USER_AGENT)
        .header("Accept-Language", "en-US,en;q=0.9");

    let request = match tier {
        Tier::Xhr => request
            .header("Accept", XHR_ACCEPT)
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Referer", url),
        _ => request.header("Accept", STATIC_ACCEPT),
    };

    settings
        .headers
        .iter()
        .fold(request, |request, (name, value)| request.header(name, value))
}
