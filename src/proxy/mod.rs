pub mod client;
pub mod fetcher;

pub use client::{DecodoClient, ProxyPage, ProxyService};
pub use fetcher::ProxyFetcher;
