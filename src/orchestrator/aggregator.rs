use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::orchestrator::run::BatchRun;
use crate::orchestrator::task::{Tier, UrlOutcome};
use crate::utils::Metrics;

/// Summary statistics for a finished run. Counts are per input position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    /// Accepted URLs per tier
    pub by_tier: BTreeMap<Tier, usize>,
    /// Seconds
    pub total_time: f64,
    /// Percent of URLs that ended in success
    pub success_rate: f64,
    /// How many URLs each tier that ran was handed, in order
    pub tier_inputs: Vec<TierInput>,
    pub js_batches_processed: usize,
    pub decodo_fallback_count: usize,
    pub cancelled: bool,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierInput {
    pub tier: Tier,
    pub urls: usize,
}

/// Response for one batch request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub run_id: String,
    /// One entry per input URL, in input order
    pub results: Vec<UrlOutcome>,
    pub summary: BatchSummary,
}

/// Summarize a finished run
pub fn summarize(run: &BatchRun) -> BatchSummary {
    let results = run.results();
    let total = results.len();
    let success = results.iter().filter(|o| o.is_success()).count();

    let mut by_tier = BTreeMap::new();
    for tier in results.iter().filter_map(|o| o.method) {
        *by_tier.entry(tier).or_insert(0) += 1;
    }

    let success_rate = if total == 0 {
        0.0
    } else {
        success as f64 * 100.0 / total as f64
    };

    let metrics = run.metrics().clone();

    BatchSummary {
        total,
        success,
        failed: total - success,
        decodo_fallback_count: by_tier.get(&Tier::Decodo).copied().unwrap_or(0),
        by_tier,
        total_time: run.elapsed().as_secs_f64(),
        success_rate,
        tier_inputs: run
            .tier_inputs()
            .iter()
            .map(|&(tier, urls)| TierInput { tier, urls })
            .collect(),
        js_batches_processed: metrics.render_batches,
        cancelled: run.is_cancelled(),
        metrics,
    }
}

/// Assemble the response for a finished run
pub fn into_response(run: &BatchRun) -> BatchResponse {
    BatchResponse {
        run_id: run.run_id.to_string(),
        results: run.results(),
        summary: summarize(run),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::RunConfiguration;
    use crate::content::Verdict;
    use crate::error::FetchError;
    use crate::orchestrator::task::FetchAttemptResult;
    use std::sync::Arc;

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
    fn test_summary_counts() {
        let urls: Vec<String> = ["https://a.test", "https://b.test", "https://c.test", "https://d.test"]
            .iter()
            .map(|u| u.to_string())
            .collect();
        let mut run = BatchRun::new(urls, Arc::new(RunConfiguration::default()));

        run.begin_tier(Tier::Static, 4);
        run.record(&accepted("https://a.test", Tier::Static));
        run.record(&accepted("https://b.test", Tier::Static));
        run.begin_tier(Tier::Xhr, 2);
        run.begin_tier(Tier::CustomJs, 2);
        run.record(&accepted("https://c.test", Tier::CustomJs));
        run.begin_tier(Tier::Decodo, 1);
        run.record(&FetchAttemptResult::failed(
            "https://d.test",
            Tier::Decodo,
            FetchError::Transport("refused".to_string()),
        ));
        run.finish(Metrics::default());

        let summary = summarize(&run);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.success, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.by_tier.get(&Tier::Static), Some(&2));
        assert_eq!(summary.by_tier.get(&Tier::CustomJs), Some(&1));
        assert_eq!(summary.by_tier.get(&Tier::Decodo), None);
        assert_eq!(summary.decodo_fallback_count, 0);
        assert_eq!(summary.success_rate, 75.0);
        assert_eq!(
            summary.tier_inputs.iter().map(|t| t.urls).collect::<Vec<_>>(),
            vec![4, 2, 2, 1]
        );
        assert!(!summary.cancelled);
    }

    #[test]
    fn test_summary_serializes_tier_names() {
        let urls = vec!["https://a.test".to_string()];
        let mut run = BatchRun::new(urls, Arc::new(RunConfiguration::default()));
        run.record(&accepted("https://a.test", Tier::Static));
        run.finish(Metrics::default());

        let json = serde_json::to_value(summarize(&run)).unwrap();
        assert_eq!(json["by_tier"]["static"], 1);
    }
}
