use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::remote::{normalize_endpoint, RenderService, RenderedPage};
use crate::cli::config::{CustomJsSettings, RunConfiguration};
use crate::content::{ContentClassifier, InsufficientReason};
use crate::error::FetchError;
use crate::orchestrator::task::{FetchAttemptResult, Tier};
use crate::utils::MetricsCollector;

/// Batches waiting for an endpoint, shared by every worker of one pass
struct BatchQueue {
    batches: Mutex<VecDeque<Vec<String>>>,
    live_endpoints: AtomicUsize,
    /// Fired once the last batch has been handed out; the queue never refills
    drained: CancellationToken,
}

impl BatchQueue {
    fn new(batches: VecDeque<Vec<String>>, endpoints: usize) -> Self {
        Self {
            batches: Mutex::new(batches),
            live_endpoints: AtomicUsize::new(endpoints),
            drained: CancellationToken::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.batches.lock().map_or(true, |queue| queue.is_empty())
    }

    fn pop(&self) -> Option<Vec<String>> {
        let mut queue = self.batches.lock().ok()?;
        let batch = queue.pop_front();
        if queue.is_empty() {
            self.drained.cancel();
        }
        batch
    }

    fn drain(&self) -> Vec<String> {
        let stranded = match self.batches.lock() {
            Ok(mut queue) => queue.drain(..).flatten().collect(),
            Err(_) => Vec::new(),
        };
        self.drained.cancel();
        stranded
    }
}

/// Spreads tier-3 work over the configured rendering endpoints.
///
/// Each endpoint gets one worker that pulls batches from a shared queue and
/// handles a single batch at a time, resting `cooldown_secs` between batches.
/// Endpoints that keep failing are retired for the rest of the pass.
pub struct RenderDispatcher {
    service: Arc<dyn RenderService>,
    classifier: ContentClassifier,
    metrics: MetricsCollector,
}

impl RenderDispatcher {
    pub fn new(
        service: Arc<dyn RenderService>,
        config: &RunConfiguration,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            service,
            classifier: ContentClassifier::new(config.content.clone()),
            metrics,
        }
    }

    /// Render every URL once, yielding results batch by batch
    pub fn attempt(
        &self,
        urls: Vec<String>,
        config: Arc<RunConfiguration>,
    ) -> BoxStream<'static, FetchAttemptResult> {
        let settings = config.custom_js.clone();
        let batch_size = settings.batch_size.max(1);

        let batches: VecDeque<Vec<String>> =
            urls.chunks(batch_size).map(|chunk| chunk.to_vec()).collect();
        if batches.is_empty() {
            return stream::empty().boxed();
        }

        let endpoints: Vec<String> = settings
            .service_endpoints
            .iter()
            .map(|e| normalize_endpoint(e))
            .take(batches.len())
            .collect();

        info!(
            "Rendering {} URLs in {} batches across {} endpoints (~{} waves)",
            urls.len(),
            batches.len(),
            endpoints.len(),
            estimated_waves(urls.len(), settings.service_endpoints.len(), batch_size)
        );

        let queue = Arc::new(BatchQueue::new(batches, endpoints.len()));

        let workers: Vec<BoxStream<'static, Vec<FetchAttemptResult>>> = endpoints
            .into_iter()
            .map(|endpoint| {
                let worker = EndpointWorker {
                    endpoint,
                    settings: settings.clone(),
                    service: self.service.clone(),
                    classifier: self.classifier.clone(),
                    metrics: self.metrics.clone(),
                    queue: queue.clone(),
                    last_finished: None,
                    consecutive_failures: 0,
                    retired: false,
                };
                stream::unfold(worker, |mut worker| async move {
                    let results = worker.next_batch().await?;
                    Some((results, worker))
                })
                .boxed()
            })
            .collect();

        stream::select_all(workers).flat_map(stream::iter).boxed()
    }
}

/// Rough number of rounds needed when every endpoint takes one batch per round
pub fn estimated_waves(urls: usize, endpoints: usize, batch_size: usize) -> usize {
    let per_wave = endpoints.max(1) * batch_size.max(1);
    (urls + per_wave - 1) / per_wave
}

struct EndpointWorker {
    endpoint: String,
    settings: CustomJsSettings,
    service: Arc<dyn RenderService>,
    classifier: ContentClassifier,
    metrics: MetricsCollector,
    queue: Arc<BatchQueue>,
    last_finished: Option<Instant>,
    consecutive_failures: u32,
    retired: bool,
}

impl EndpointWorker {
    /// Process the next queued batch, or `None` once this worker is done
    async fn next_batch(&mut self) -> Option<Vec<FetchAttemptResult>> {
        if self.retired || self.queue.is_empty() {
            return None;
        }

        if let Some(finished) = self.last_finished {
            let ready_at = finished.checked_add(self.settings.cooldown());
            if ready_at.map_or(true, |at| at > Instant::now()) {
                debug!("{} cooling down", self.endpoint);
                let rest = async move {
                    match ready_at {
                        Some(at) => sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = rest => {}
                    _ = self.queue.drained.cancelled() => {
                        debug!("{} done, queue drained during cooldown", self.endpoint);
                        return None;
                    }
                }
            }
        }

        // Another worker may have taken the last batch while we rested
        let batch = self.queue.pop()?;
        let timeout = self.settings.timeout();

        debug!("{} rendering batch of {}", self.endpoint, batch.len());
        let timer = self.metrics.start_timer();
        let outcome = tokio::time::timeout(
            timeout,
            self.service.render_batch(&self.endpoint, &batch, timeout),
        )
        .await
        .unwrap_or(Err(FetchError::Timeout(timeout)));
        let elapsed_ms = timer.end();
        self.last_finished = Some(Instant::now());

        let mut results = match outcome {
            Ok(pages) => {
                self.consecutive_failures = 0;
                self.metrics.record_render_batch(true).await;
                self.classify_batch(&batch, pages)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.metrics.record_render_batch(false).await;
                warn!(
                    "Render batch on {} failed ({} in a row): {}",
                    self.endpoint, self.consecutive_failures, e
                );
                batch
                    .iter()
                    .map(|url| FetchAttemptResult::failed(url, Tier::CustomJs, e.clone()))
                    .collect()
            }
        };

        // Only the URLs actually sent count as requests
        for attempt in &results {
            self.metrics
                .record_request(
                    Tier::CustomJs,
                    attempt.is_sufficient(),
                    elapsed_ms,
                    None,
                    attempt.bytes(),
                )
                .await;
        }

        if self.consecutive_failures >= self.settings.max_endpoint_failures {
            results.extend(self.retire().await);
        }

        Some(results)
    }

    /// Take this endpoint out of rotation; the last one out fails the leftovers
    async fn retire(&mut self) -> Vec<FetchAttemptResult> {
        self.retired = true;
        self.metrics.record_endpoint_retired(&self.endpoint).await;

        let remaining = self
            .queue
            .live_endpoints
            .fetch_sub(1, Ordering::SeqCst)
            .saturating_sub(1);
        warn!(
            "Retiring render endpoint {} ({} still live)",
            self.endpoint, remaining
        );
        if remaining > 0 {
            return Vec::new();
        }

        let stranded = self.queue.drain();
        if !stranded.is_empty() {
            warn!(
                "No rendering endpoint left, {} URLs move on unrendered",
                stranded.len()
            );
        }
        stranded
            .into_iter()
            .map(|url| {
                FetchAttemptResult::failed(
                    url,
                    Tier::CustomJs,
                    FetchError::ServiceRejected {
                        status: None,
                        message: "no rendering endpoint available".to_string(),
                    },
                )
            })
            .collect()
    }

    fn classify_batch(&self, batch: &[String], pages: Vec<RenderedPage>) -> Vec<FetchAttemptResult> {
        let mut by_url: HashMap<String, RenderedPage> = pages
            .into_iter()
            .map(|page| (page.url.clone(), page))
            .collect();

        batch
            .iter()
            .map(|url| match by_url.remove(url) {
                Some(RenderedPage {
                    html: Some(html), ..
                }) => FetchAttemptResult::classified(
                    url,
                    Tier::CustomJs,
                    Some(html),
                    &self.classifier,
                ),
                Some(RenderedPage { error, .. }) => FetchAttemptResult::failed(
                    url,
                    Tier::CustomJs,
                    FetchError::ServiceRejected {
                        status: None,
                        message: error.unwrap_or_else(|| "no html returned".to_string()),
                    },
                ),
                None => FetchAttemptResult::failed(
                    url,
                    Tier::CustomJs,
                    FetchError::InsufficientContent(InsufficientReason::Absent),
                ),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimated_waves() {
        assert_eq!(estimated_waves(100, 1, 20), 5);
        assert_eq!(estimated_waves(100, 3, 20), 2);
        assert_eq!(estimated_waves(1, 5, 20), 1);
        assert_eq!(estimated_waves(0, 2, 20), 0);
    }
}
