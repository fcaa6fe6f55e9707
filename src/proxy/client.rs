use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cli::config::DecodoSettings;
use crate::error::FetchError;
use crate::fetch::transport::map_reqwest_error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
    pub headless: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResponse {
    #[serde(default)]
    pub results: Vec<ScrapeResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub status_code: Option<u16>,
}

/// Page fetched through the unblocking proxy
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyPage {
    pub content: String,
    pub status: Option<u16>,
}

#[async_trait]
pub trait ProxyService: Send + Sync {
    async fn fetch(&self, url: &str, settings: &DecodoSettings) -> Result<ProxyPage, FetchError>;
}

/// Decodo scraper API client
pub struct DecodoClient {
    client: Client,
}

impl DecodoClient {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .gzip(true)
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to build proxy client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ProxyService for DecodoClient {
    async fn fetch(&self, url: &str, settings: &DecodoSettings) -> Result<ProxyPage, FetchError> {
        let (username, password) = settings
            .credentials()
            .ok_or_else(|| FetchError::config("decodo credentials missing"))?;
        let timeout = settings.timeout();

        let request = ScrapeRequest {
            url: url.to_string(),
            headless: settings.headless_mode.clone(),
            geo: settings.location.clone(),
            locale: settings.language.clone(),
        };

        debug!("Requesting {} through proxy", url);
        let response = self
            .client
            .post(&settings.endpoint)
            .basic_auth(username, Some(password))
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(FetchError::rejected(status.as_u16(), snippet));
        }

        let body = response
            .json::<ScrapeResponse>()
            .await
            .map_err(|e| FetchError::ServiceRejected {
                status: Some(status.as_u16()),
                message: format!("unexpected response format: {e}"),
            })?;

        let result = body.results.into_iter().next().ok_or_else(|| FetchError::ServiceRejected {
            status: Some(status.as_u16()),
            message: "response contained no results".to_string(),
        })?;

        match result.status_code {
            Some(code) if !(200..300).contains(&code) => Err(FetchError::rejected(
                code,
                format!("target returned HTTP {code}"),
            )),
            code => Ok(ProxyPage {
                content: result.content.unwrap_or_default(),
                status: code,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrape_request_omits_unset_geo() {
        let request = ScrapeRequest {
            url: "https://a.test".to_string(),
            headless: "html".to_string(),
            geo: None,
            locale: Some("en-us".to_string()),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("geo").is_none());
        assert_eq!(json["locale"], "en-us");
        assert_eq!(json["headless"], "html");
    }
}
