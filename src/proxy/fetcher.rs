use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::cli::config::{RunConfiguration, DECODO_HARD_CONCURRENCY};
use crate::content::ContentClassifier;
use crate::error::FetchError;
use crate::orchestrator::task::{FetchAttemptResult, FetchRequest, Tier};
use crate::proxy::client::ProxyService;
use crate::utils::MetricsCollector;

/// Last-resort tier: the unblocking proxy, never more than three requests at once
#[derive(Clone)]
pub struct ProxyFetcher {
    service: Arc<dyn ProxyService>,
    classifier: ContentClassifier,
    permits: Arc<Semaphore>,
    limit: usize,
    metrics: MetricsCollector,
}

impl ProxyFetcher {
    pub fn new(
        service: Arc<dyn ProxyService>,
        config: &RunConfiguration,
        metrics: MetricsCollector,
    ) -> Self {
        let limit = config
            .decodo
            .effective_concurrency()
            .min(DECODO_HARD_CONCURRENCY);
        Self {
            service,
            classifier: ContentClassifier::new(config.content.clone()),
            permits: Arc::new(Semaphore::new(limit)),
            limit,
            metrics,
        }
    }

    pub fn attempt(
        &self,
        urls: Vec<String>,
        config: Arc<RunConfiguration>,
    ) -> BoxStream<'static, FetchAttemptResult> {
        info!("Proxy fallback for {} URLs ({} at a time)", urls.len(), self.limit);
        let fetcher = self.clone();

        stream::iter(urls)
            .map(move |url| {
                let fetcher = fetcher.clone();
                let request = FetchRequest::new(url, config.clone());
                async move { fetcher.fetch_one(request).await }
            })
            .buffer_unordered(self.limit)
            .boxed()
    }

    async fn fetch_one(&self, request: FetchRequest) -> FetchAttemptResult {
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return FetchAttemptResult::failed(
                    request.url,
                    Tier::Decodo,
                    FetchError::Cancelled("proxy pool closed".to_string()),
                )
            }
        };

        let settings = &request.config.decodo;
        let timeout = settings.timeout();

        let timer = self.metrics.start_timer();
        let result = tokio::time::timeout(timeout, self.service.fetch(&request.url, settings)).await;
        let elapsed_ms = timer.end();

        let mut status = None;
        let attempt = match result {
            Err(_) => {
                FetchAttemptResult::failed(&request.url, Tier::Decodo, FetchError::Timeout(timeout))
            }
            Ok(Err(e)) => FetchAttemptResult::failed(&request.url, Tier::Decodo, e),
            Ok(Ok(page)) => {
                status = page.status;
                FetchAttemptResult::classified(
                    &request.url,
                    Tier::Decodo,
                    Some(page.content),
                    &self.classifier,
                )
            }
        };

        debug!("decodo {} -> {} in {}ms", request.url, attempt.verdict, elapsed_ms);
        self.metrics
            .record_request(
                Tier::Decodo,
                attempt.is_sufficient(),
                elapsed_ms,
                status,
                attempt.bytes(),
            )
            .await;

        attempt
    }
}
