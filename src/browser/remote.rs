use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use crate::error::FetchError;
use crate::fetch::transport::map_reqwest_error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderServiceRequest {
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderServiceResponse {
    pub results: Vec<RenderServiceResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderServiceResult {
    pub url: String,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One page as returned by a rendering endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub url: String,
    /// Present only when the service reported success
    pub html: Option<String>,
    pub error: Option<String>,
}

impl From<RenderServiceResult> for RenderedPage {
    fn from(result: RenderServiceResult) -> Self {
        let succeeded = result.status.as_deref() == Some("success");
        if succeeded {
            RenderedPage {
                url: result.url,
                html: result.html,
                error: None,
            }
        } else {
            RenderedPage {
                url: result.url,
                html: None,
                error: Some(
                    result
                        .error
                        .unwrap_or_else(|| "render failed without a reason".to_string()),
                ),
            }
        }
    }
}

/// Client for the batch JS rendering endpoints
#[async_trait]
pub trait RenderService: Send + Sync {
    async fn render_batch(
        &self,
        endpoint: &str,
        urls: &[String],
        timeout: Duration,
    ) -> Result<Vec<RenderedPage>, FetchError>;
}

pub struct RemoteRenderService {
    client: Client,
}

impl RemoteRenderService {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .gzip(true)
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to build render client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl RenderService for RemoteRenderService {
    async fn render_batch(
        &self,
        endpoint: &str,
        urls: &[String],
        timeout: Duration,
    ) -> Result<Vec<RenderedPage>, FetchError> {
        let request = RenderServiceRequest {
            urls: urls.to_vec(),
        };

        debug!("Sending {} URLs to render service {}", urls.len(), endpoint);

        let response = self
            .client
            .post(endpoint)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            error!("Render service {} returned status {}: {}", endpoint, status, snippet);
            return Err(FetchError::rejected(status.as_u16(), snippet));
        }

        let body = response
            .json::<RenderServiceResponse>()
            .await
            .map_err(|e| FetchError::ServiceRejected {
                status: Some(status.as_u16()),
                message: format!("unexpected response format: {e}"),
            })?;

        Ok(body.results.into_iter().map(RenderedPage::from).collect())
    }
}

/// `render.example.com` becomes `https://render.example.com/render`
pub fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}/render", endpoint.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("worker-1.up.railway.app"),
            "https://worker-1.up.railway.app/render"
        );
        assert_eq!(
            normalize_endpoint("http://localhost:3000/render"),
            "http://localhost:3000/render"
        );
    }

    #[test]
    fn test_failed_result_drops_html() {
        let result: RenderServiceResult = serde_json::from_str(
            r#"{"url": "https://a.test", "html": "<html></html>", "status": "failed", "error": "navigation timeout"}"#,
        )
        .unwrap();
        let page = RenderedPage::from(result);
        assert_eq!(page.html, None);
        assert_eq!(page.error.as_deref(), Some("navigation timeout"));
    }
}
