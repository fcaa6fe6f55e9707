pub mod aggregator;
pub mod controller;
pub mod run;
pub mod task;

// Re-export common types
pub use aggregator::{summarize, BatchResponse, BatchSummary, TierInput};
pub use controller::{BatchRequest, FetchOrchestrator};
pub use run::BatchRun;
pub use task::{FetchAttemptResult, FetchRequest, OutcomeStatus, Tier, UrlOutcome};
