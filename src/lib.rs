//! Tiered URL to HTML fetching.
//!
//! URLs are tried with plain HTTP first, then as data requests, then through
//! remote JS rendering endpoints, and finally through an unblocking proxy. A
//! URL stops at the first tier whose content passes the sufficiency check.

pub mod browser;
pub mod cli;
pub mod content;
pub mod error;
pub mod fetch;
pub mod orchestrator;
pub mod proxy;
pub mod storage;
pub mod utils;

pub use cli::config::{ConfigOverrides, RunConfiguration};
pub use error::FetchError;
pub use orchestrator::{BatchRequest, BatchResponse, BatchSummary, FetchOrchestrator, Tier, UrlOutcome};
