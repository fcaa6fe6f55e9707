use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::cli::config::RunConfiguration;
use crate::content::{ContentClassifier, Verdict};
use crate::error::FetchError;

/// A fetch strategy, in escalating cost order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Static,
    Xhr,
    CustomJs,
    Decodo,
}

impl Tier {
    /// Order in which a URL walks the tiers
    pub const ESCALATION: [Tier; 4] = [Tier::Static, Tier::Xhr, Tier::CustomJs, Tier::Decodo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Static => "static",
            Tier::Xhr => "xhr",
            Tier::CustomJs => "custom_js",
            Tier::Decodo => "decodo",
        }
    }

    /// Whether this tier takes part in a run under the given configuration
    pub fn is_enabled(&self, config: &RunConfiguration) -> bool {
        match self {
            Tier::Decodo => config.decodo.enabled,
            _ => true,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A URL to fetch together with the run's configuration
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub config: Arc<RunConfiguration>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, config: Arc<RunConfiguration>) -> Self {
        Self {
            url: url.into(),
            config,
        }
    }
}

/// Result of one tier's attempt at one URL.
///
/// `error` is always set when the verdict is insufficient; when nothing else
/// went wrong it carries the classifier's reason.
#[derive(Debug, Clone)]
pub struct FetchAttemptResult {
    pub url: String,
    pub tier: Tier,
    pub content: Option<String>,
    pub verdict: Verdict,
    pub error: Option<FetchError>,
}

impl FetchAttemptResult {
    /// Classify received content and build the attempt from the verdict
    pub fn classified(
        url: impl Into<String>,
        tier: Tier,
        content: Option<String>,
        classifier: &ContentClassifier,
    ) -> Self {
        let verdict = classifier.classify(content.as_deref());
        let error = verdict
            .reason()
            .map(|reason| FetchError::InsufficientContent(reason.clone()));

        Self {
            url: url.into(),
            tier,
            content,
            verdict,
            error,
        }
    }

    /// An attempt that produced no usable content
    pub fn failed(url: impl Into<String>, tier: Tier, error: FetchError) -> Self {
        Self {
            url: url.into(),
            tier,
            content: None,
            verdict: Verdict::Insufficient(crate::content::InsufficientReason::Absent),
            error: Some(error),
        }
    }

    pub fn is_sufficient(&self) -> bool {
        self.verdict.is_sufficient()
    }

    pub fn bytes(&self) -> usize {
        self.content.as_ref().map_or(0, |c| c.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Pending,
    Success,
    Failed,
}

/// Final result for one URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlOutcome {
    pub url: String,
    /// Accepted content, or the largest insufficient body seen for a failed URL
    pub html: Option<String>,
    /// Tier that produced the accepted content
    pub method: Option<Tier>,
    pub status: OutcomeStatus,
    pub error: Option<String>,
    /// Tiers tried, in order
    pub attempted: Vec<Tier>,
}

impl UrlOutcome {
    pub fn pending(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: None,
            method: None,
            status: OutcomeStatus::Pending,
            error: None,
            attempted: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != OutcomeStatus::Pending
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    /// The outcome after taking one more attempt into account
    pub fn advance(&self, attempt: &FetchAttemptResult) -> UrlOutcome {
        let mut attempted = self.attempted.clone();
        attempted.push(attempt.tier);

        if attempt.is_sufficient() {
            return UrlOutcome {
                url: self.url.clone(),
                html: attempt.content.clone(),
                method: Some(attempt.tier),
                status: OutcomeStatus::Success,
                error: None,
                attempted,
            };
        }

        let html = match (&self.html, &attempt.content) {
            (Some(previous), Some(current)) if current.len() > previous.len() => {
                Some(current.clone())
            }
            (None, Some(current)) => Some(current.clone()),
            (previous, _) => previous.clone(),
        };
        let error = attempt
            .error
            .as_ref()
            .map(|e| format!("{}: {}", attempt.tier, e))
            .or_else(|| Some(format!("{}: {}", attempt.tier, attempt.verdict)));

        UrlOutcome {
            url: self.url.clone(),
            html,
            method: None,
            status: OutcomeStatus::Pending,
            error,
            attempted,
        }
    }

    /// Close out a URL that no tier accepted
    pub fn fail(&self) -> UrlOutcome {
        UrlOutcome {
            status: OutcomeStatus::Failed,
            error: self
                .error
                .clone()
                .or_else(|| Some("no tier produced sufficient content".to_string())),
            ..self.clone()
        }
    }

    /// Close out a URL abandoned by cancellation
    pub fn cancel(&self, error: &FetchError) -> UrlOutcome {
        UrlOutcome {
            status: OutcomeStatus::Failed,
            error: Some(error.to_string()),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::InsufficientReason;

    #[test]
    fn test_tier_names_and_order() {
        let names: Vec<&str> = Tier::ESCALATION.iter().map(|t| t.as_str()).collect();
        assert_eq!(names, vec!["static", "xhr", "custom_js", "decodo"]);
        assert!(Tier::Static < Tier::Decodo);
        assert_eq!(
            serde_json::to_string(&Tier::CustomJs).unwrap(),
            "\"custom_js\""
        );
    }

    #[test]
    fn test_decodo_enable_rule() {
        let mut config = RunConfiguration::default();
        config.decodo.enabled = false;
        assert!(!Tier::Decodo.is_enabled(&config));
        assert!(Tier::CustomJs.is_enabled(&config));
    }

    #[test]
    fn test_advance_keeps_largest_insufficient_body() {
        let outcome = UrlOutcome::pending("https://a.test/");
        let small = FetchAttemptResult {
            url: "https://a.test/".to_string(),
            tier: Tier::Static,
            content: Some("<html>tiny</html>".to_string()),
            verdict: Verdict::Insufficient(InsufficientReason::TooShort { bytes: 17, min: 1000 }),
            error: Some(FetchError::InsufficientContent(InsufficientReason::TooShort {
                bytes: 17,
                min: 1000,
            })),
        };
        let outcome = outcome.advance(&small);
        let failed = FetchAttemptResult::failed(
            "https://a.test/",
            Tier::Xhr,
            FetchError::Transport("connection reset".to_string()),
        );
        let outcome = outcome.advance(&failed);

        assert_eq!(outcome.status, OutcomeStatus::Pending);
        assert_eq!(outcome.html.as_deref(), Some("<html>tiny</html>"));
        assert_eq!(outcome.attempted, vec![Tier::Static, Tier::Xhr]);
        assert_eq!(
            outcome.error.as_deref(),
            Some("xhr: transport error: connection reset")
        );

        let failed = outcome.fail();
        assert_eq!(failed.status, OutcomeStatus::Failed);
        assert_eq!(failed.method, None);
    }

    #[test]
    fn test_advance_to_success_clears_error() {
        let outcome = UrlOutcome::pending("https://b.test/").advance(&FetchAttemptResult::failed(
            "https://b.test/",
            Tier::Static,
            FetchError::Timeout(std::time::Duration::from_secs(30)),
        ));
        let accepted = FetchAttemptResult {
            url: "https://b.test/".to_string(),
            tier: Tier::CustomJs,
            content: Some("<html>rendered</html>".to_string()),
            verdict: Verdict::Sufficient,
            error: None,
        };
        let outcome = outcome.advance(&accepted);
        assert!(outcome.is_success());
        assert_eq!(outcome.method, Some(Tier::CustomJs));
        assert_eq!(outcome.error, None);
    }
}
