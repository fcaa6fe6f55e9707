use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::cli::config::RunConfiguration;
use crate::error::FetchError;
use crate::orchestrator::task::{FetchAttemptResult, Tier, UrlOutcome};
use crate::utils::Metrics;

/// Working set of one orchestration run.
///
/// Every distinct input URL has exactly one entry from start to finish.
/// Duplicate inputs share that entry.
#[derive(Debug)]
pub struct BatchRun {
    pub run_id: Uuid,
    pub config: Arc<RunConfiguration>,
    inputs: Vec<String>,
    unique: Vec<String>,
    outcomes: HashMap<String, UrlOutcome>,
    tier_inputs: Vec<(Tier, usize)>,
    started: Instant,
    finished: Option<Instant>,
    cancelled: bool,
    metrics: Metrics,
}

impl BatchRun {
    pub fn new(inputs: Vec<String>, config: Arc<RunConfiguration>) -> Self {
        let unique: Vec<String> = {
            let mut seen = HashSet::new();
            inputs
                .iter()
                .filter(|url| seen.insert(url.as_str()))
                .cloned()
                .collect()
        };
        let outcomes = unique
            .iter()
            .map(|url| (url.clone(), UrlOutcome::pending(url)))
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            config,
            inputs,
            unique,
            outcomes,
            tier_inputs: Vec::new(),
            started: Instant::now(),
            finished: None,
            cancelled: false,
            metrics: Metrics::default(),
        }
    }

    /// URLs still waiting for sufficient content, in first-seen input order
    pub fn pending_urls(&self) -> Vec<String> {
        self.unique
            .iter()
            .filter(|url| self.outcomes.get(*url).map_or(false, |o| !o.is_terminal()))
            .cloned()
            .collect()
    }

    /// Note how many URLs a tier was handed
    pub fn begin_tier(&mut self, tier: Tier, count: usize) {
        self.tier_inputs.push((tier, count));
    }

    /// Fold one attempt into its URL's outcome; terminal entries are left alone
    pub fn record(&mut self, attempt: &FetchAttemptResult) -> Option<&UrlOutcome> {
        let current = self.outcomes.get(&attempt.url)?;
        if current.is_terminal() {
            return None;
        }
        let next = current.advance(attempt);
        self.outcomes.insert(attempt.url.clone(), next);
        self.outcomes.get(&attempt.url)
    }

    /// Fail every pending URL with the cancellation error
    pub fn cancel_pending(&mut self, reason: impl Into<String>) {
        let error = FetchError::Cancelled(reason.into());
        for outcome in self.outcomes.values_mut() {
            if !outcome.is_terminal() {
                *outcome = outcome.cancel(&error);
            }
        }
        self.cancelled = true;
    }

    /// Close the run: anything still pending has failed
    pub fn finish(&mut self, metrics: Metrics) {
        for outcome in self.outcomes.values_mut() {
            if !outcome.is_terminal() {
                *outcome = outcome.fail();
            }
        }
        self.metrics = metrics;
        self.finished = Some(Instant::now());
    }

    /// One outcome per input position
    pub fn results(&self) -> Vec<UrlOutcome> {
        self.inputs
            .iter()
            .filter_map(|url| self.outcomes.get(url).cloned())
            .collect()
    }

    pub fn outcome(&self, url: &str) -> Option<&UrlOutcome> {
        self.outcomes.get(url)
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn tier_inputs(&self) -> &[(Tier, usize)] {
        &self.tier_inputs
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn elapsed(&self) -> Duration {
        self.finished
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Verdict;
    use crate::orchestrator::task::OutcomeStatus;

    fn run(urls: &[&str]) -> BatchRun {
        BatchRun::new(
            urls.iter().map(|u| u.to_string()).collect(),
            Arc::new(RunConfiguration::default()),
        )
    }

    fn accepted(url: &str, tier: Tier) -> FetchAttemptResult {
        FetchAttemptResult {
            url: url.to_string(),
            tier,
            content: Some("<html>ok</html>".to_string()),
            verdict: Verdict::Sufficient,
            error: None,
        }
    }

    #[test]
    fn test_duplicates_share_one_entry() {
        let mut run = run(&["https://a.test", "https://b.test", "https://a.test"]);
        assert_eq!(run.pending_urls(), vec!["https://a.test", "https://b.test"]);

        run.record(&accepted("https://a.test", Tier::Static));
        run.finish(Metrics::default());

        let results = run.results();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], results[2]);
        assert_eq!(results[1].status, OutcomeStatus::Failed);
    }

    #[test]
    fn test_terminal_entries_are_not_overwritten() {
        let mut run = run(&["https://a.test"]);
        run.record(&accepted("https://a.test", Tier::Static));
        let late = FetchAttemptResult::failed(
            "https://a.test",
            Tier::Xhr,
            FetchError::Transport("reset".to_string()),
        );
        assert!(run.record(&late).is_none());

        let outcome = run.outcome("https://a.test").unwrap();
        assert_eq!(outcome.method, Some(Tier::Static));
        assert_eq!(outcome.attempted, vec![Tier::Static]);
    }

    #[test]
    fn test_unknown_urls_are_ignored() {
        let mut run = run(&["https://a.test"]);
        assert!(run.record(&accepted("https://other.test", Tier::Static)).is_none());
        assert!(run.outcome("https://other.test").is_none());
    }

    #[test]
    fn test_cancel_marks_pending_failed() {
        let mut run = run(&["https://a.test", "https://b.test"]);
        run.record(&accepted("https://b.test", Tier::Static));
        run.cancel_pending("run deadline exceeded");
        run.finish(Metrics::default());

        assert!(run.is_cancelled());
        let a = run.outcome("https://a.test").unwrap();
        assert_eq!(a.status, OutcomeStatus::Failed);
        assert_eq!(a.error.as_deref(), Some("cancelled: run deadline exceeded"));
        assert!(run.outcome("https://b.test").unwrap().is_success());
    }
}
