use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use smart_fetcher::browser::{RemoteRenderService, RenderService};
use smart_fetcher::cli::config::RunConfiguration;
use smart_fetcher::error::FetchError;
use smart_fetcher::fetch::{HttpRequest, HttpTransport, ReqwestTransport};
use smart_fetcher::proxy::{DecodoClient, ProxyService};

#[tokio::test]
async fn transport_sends_headers_and_returns_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/item"))
        .and(header("X-Requested-With", "XMLHttpRequest"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html>item</html>", "text/html; charset=utf-8"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new().expect("client");
    let url = format!("{}/item", server.uri());
    let request = HttpRequest::get(&url, Duration::from_secs(5))
        .header("X-Requested-With", "XMLHttpRequest");

    let response = transport.execute(request).await.expect("response");
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "<html>item</html>");
    assert_eq!(response.final_url, url);
    assert!(response.content_type.unwrap().starts_with("text/html"));
}

#[tokio::test]
async fn transport_reports_non_success_status_without_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new().expect("client");
    let request = HttpRequest::get(format!("{}/missing", server.uri()), Duration::from_secs(5));

    let response = transport.execute(request).await.expect("response");
    assert_eq!(response.status, 404);
    assert!(!response.is_success());
}

#[tokio::test]
async fn transport_times_out_on_slow_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(500))
                .set_body_string("slow"),
        )
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new().expect("client");
    let timeout = Duration::from_millis(50);
    let request = HttpRequest::get(format!("{}/slow", server.uri()), timeout);

    let err = transport.execute(request).await.unwrap_err();
    assert_eq!(err, FetchError::Timeout(timeout));
}

#[tokio::test]
async fn render_service_posts_urls_and_parses_results() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/render"))
        .and(body_json(json!({"urls": ["https://a.test/", "https://b.test/"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"url": "https://a.test/", "html": "<html>a</html>", "status": "success"},
                {"url": "https://b.test/", "status": "failed", "error": "navigation timeout"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let service = RemoteRenderService::new().expect("client");
    let endpoint = format!("{}/render", server.uri());
    let urls = vec!["https://a.test/".to_string(), "https://b.test/".to_string()];

    let pages = service
        .render_batch(&endpoint, &urls, Duration::from_secs(5))
        .await
        .expect("pages");
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].html.as_deref(), Some("<html>a</html>"));
    assert_eq!(pages[1].html, None);
    assert_eq!(pages[1].error.as_deref(), Some("navigation timeout"));
}

#[tokio::test]
async fn render_service_rejects_non_success_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/render"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let service = RemoteRenderService::new().expect("client");
    let endpoint = format!("{}/render", server.uri());

    let err = service
        .render_batch(&endpoint, &["https://a.test/".to_string()], Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        FetchError::ServiceRejected {
            status: Some(429),
            message: "slow down".to_string(),
        }
    );
}

#[tokio::test]
async fn render_service_rejects_malformed_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/render"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pages": []})))
        .mount(&server)
        .await;

    let service = RemoteRenderService::new().expect("client");
    let endpoint = format!("{}/render", server.uri());

    let err = service
        .render_batch(&endpoint, &["https://a.test/".to_string()], Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "service_rejected");
}

fn decodo_settings(endpoint: String) -> smart_fetcher::cli::config::DecodoSettings {
    let mut settings = RunConfiguration::default().decodo;
    settings.endpoint = endpoint;
    settings.username = Some("user".to_string());
    settings.password = Some("pass".to_string());
    settings.location = Some("United States".to_string());
    settings
}

#[tokio::test]
async fn decodo_client_uses_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .and(body_json(json!({
            "url": "https://blocked.test/",
            "headless": "html",
            "geo": "United States"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"content": "<html>unblocked</html>", "status_code": 200}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = DecodoClient::new().expect("client");
    let settings = decodo_settings(format!("{}/v2/scrape", server.uri()));

    let page = client
        .fetch("https://blocked.test/", &settings)
        .await
        .expect("page");
    assert_eq!(page.content, "<html>unblocked</html>");
    assert_eq!(page.status, Some(200));
}

#[tokio::test]
async fn decodo_client_rejects_target_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"content": "", "status_code": 403}]
        })))
        .mount(&server)
        .await;

    let client = DecodoClient::new().expect("client");
    let settings = decodo_settings(format!("{}/v2/scrape", server.uri()));

    let err = client
        .fetch("https://blocked.test/", &settings)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FetchError::ServiceRejected {
            status: Some(403),
            ..
        }
    ));
}
