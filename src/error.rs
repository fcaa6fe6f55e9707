use std::time::Duration;
use thiserror::Error;

use crate::content::InsufficientReason;

/// Errors produced while fetching a single URL at a single tier, plus the
/// configuration errors that reject a run before it starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// Connection, DNS or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Tier-specific timeout exceeded
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The classifier rejected the content
    #[error("insufficient content: {0}")]
    InsufficientContent(InsufficientReason),

    /// Non-2xx status or an explicit error payload from a service
    #[error("service rejected request{}: {message}", status_suffix(.status))]
    ServiceRejected { status: Option<u16>, message: String },

    /// Invalid run configuration; the only error surfaced from a run
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Run deadline exceeded or explicit abort
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl FetchError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::ServiceRejected {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Short machine-readable label, used in metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
            Self::InsufficientContent(_) => "insufficient_content",
            Self::ServiceRejected { .. } => "service_rejected",
            Self::Configuration(_) => "configuration",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::rejected(status.as_u16(), err.to_string());
        }
        Self::Transport(err.to_string())
    }
}
