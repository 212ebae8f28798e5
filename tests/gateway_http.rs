//! HTTP gateway tests against a local mock backend.

use drive2ebook::{ConversionMode, Gateway, GatewayConfig, GatewayError, HttpGateway, ResultArtifact};
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FOLDER: &str = "https://drive.google.com/drive/folders/abc";

async fn gateway_for(server: &MockServer) -> HttpGateway {
    gateway_with(server, |b| b).await
}

async fn gateway_with(
    server: &MockServer,
    tweak: impl FnOnce(drive2ebook::GatewayConfigBuilder) -> drive2ebook::GatewayConfigBuilder,
) -> HttpGateway {
    let config = tweak(GatewayConfig::builder().base_url(server.uri()))
        .build()
        .unwrap();
    HttpGateway::new(config).unwrap()
}

// ── Identity and auth ────────────────────────────────────────────────────────

#[tokio::test]
async fn session_reports_logged_in_flag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"logged_in": true})))
        .expect(1)
        .mount(&server)
        .await;

    let info = gateway_for(&server).await.get_session().await.unwrap();
    assert!(info.logged_in);
}

#[tokio::test]
async fn authorization_url_is_extracted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"url": "https://accounts.google.com/o/oauth2/auth?state=xyz"})),
        )
        .mount(&server)
        .await;

    let url = gateway_for(&server).await.authorization_url().await.unwrap();
    assert_eq!(url, "https://accounts.google.com/o/oauth2/auth?state=xyz");
}

#[tokio::test]
async fn logout_hits_the_logout_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    gateway_for(&server).await.logout().await.unwrap();
}

#[tokio::test]
async fn unexpected_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/user"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>hello</html>"))
        .mount(&server)
        .await;

    let err = gateway_for(&server).await.get_session().await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidResponse { .. }), "{err:?}");
}

#[tokio::test]
async fn unreachable_backend_is_connectivity_error() {
    let config = GatewayConfig::builder()
        .base_url("http://127.0.0.1:1")
        .connect_timeout_secs(2)
        .build()
        .unwrap();
    let gateway = HttpGateway::new(config).unwrap();

    let err = gateway.get_session().await.unwrap_err();
    assert!(matches!(err, GatewayError::Connectivity { .. }), "{err:?}");
    assert_eq!(err.user_message(), "Failed to connect to server");
}

// ── Submission ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn pdf_submission_posts_url_only() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/convert"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"url": FOLDER})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "download_url": "/api/download"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = gateway_for(&server)
        .await
        .submit(ConversionMode::Pdf, FOLDER, Some("ignored"))
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.download_url.as_deref(), Some("/api/download"));
}

#[tokio::test]
async fn ocr_submission_carries_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/ocr/convert"))
        .and(body_json(json!({"url": FOLDER, "api_key": "AIza-test"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let response = gateway_for(&server)
        .await
        .submit(ConversionMode::Ocr, FOLDER, Some("AIza-test"))
        .await
        .unwrap();
    assert!(response.success);
}

#[tokio::test]
async fn reported_failure_is_a_successful_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/convert"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "error": "No images found in folder"})),
        )
        .mount(&server)
        .await;

    let response = gateway_for(&server)
        .await
        .submit(ConversionMode::Pdf, FOLDER, None)
        .await
        .unwrap();
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("No images found in folder"));
}

#[tokio::test]
async fn rejection_message_comes_from_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/convert"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "Not authenticated"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/ocr/convert"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"detail": "URL and Gemini API Key are required"})),
        )
        .mount(&server)
        .await;

    let gateway = gateway_for(&server).await;

    let err = gateway.submit(ConversionMode::Pdf, FOLDER, None).await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::RemoteRejected {
            status: 401,
            message: "Not authenticated".into()
        }
    );

    let err = gateway
        .submit(ConversionMode::Ocr, FOLDER, Some("k"))
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "URL and Gemini API Key are required");
}

#[tokio::test]
async fn rejection_without_message_names_the_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/convert"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    let err = gateway_for(&server)
        .await
        .submit(ConversionMode::Pdf, FOLDER, None)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "HTTP error! status: 502");
}

#[tokio::test]
async fn slow_submission_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/convert"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let gateway = gateway_with(&server, |b| b.submit_timeout_secs(1)).await;
    let err = gateway.submit(ConversionMode::Pdf, FOLDER, None).await.unwrap_err();
    assert_eq!(err, GatewayError::Timeout { secs: 1 });
    assert!(err.is_timeout());
}

#[tokio::test]
async fn cancel_posts_to_cancel_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/cancel"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "message": "Cancellation requested"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    gateway_for(&server).await.cancel().await.unwrap();
}

// ── Progress channel ─────────────────────────────────────────────────────────

#[tokio::test]
async fn progress_stream_yields_event_payloads() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"status\": \"processing\", \"percent\": 5, \"message\": \"Scanning folder...\"}\n\n",
        ": keep-alive\n\n",
        "data: {\"status\": \"processing\", \"percent\": 50, \"message\": \"Downloading 5/10\"}\r\n\r\n",
        "data: {\"status\": \"complete\", \"percent\": 100, \"message\": \"Done!\"}\n\n",
    );
    Mock::given(method("GET"))
        .and(path("/api/progress"))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let events: Vec<String> = gateway_for(&server)
        .await
        .progress_events()
        .map(|item| item.unwrap())
        .collect()
        .await;

    assert_eq!(events.len(), 3);
    let last = drive2ebook::progress::parse_event(&events[2]).unwrap();
    assert_eq!(last.percent, 100);
    assert!(last.is_terminal());
    assert_eq!(
        drive2ebook::progress::parse_event(&events[1]).unwrap().message,
        "Downloading 5/10"
    );
}

#[tokio::test]
async fn progress_stream_is_lazy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/progress"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .expect(0)
        .mount(&server)
        .await;

    let stream = gateway_for(&server).await.progress_events();
    drop(stream);
}

#[tokio::test]
async fn progress_stream_surfaces_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/progress"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut stream = gateway_for(&server).await.progress_events();
    let first = stream.next().await.unwrap();
    assert!(matches!(first, Err(GatewayError::RemoteRejected { status: 500, .. })));
    assert!(stream.next().await.is_none());
}

// ── Download ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn download_returns_bytes_and_suggested_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/download"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .insert_header("content-disposition", "attachment; filename=\"your_ebook.pdf\"")
                .set_body_bytes(b"%PDF-1.4 fake".to_vec()),
        )
        .mount(&server)
        .await;

    let gateway = gateway_for(&server).await;
    let artifact = ResultArtifact {
        locator: gateway.config().download_url(),
    };
    let downloaded = gateway.download(&artifact).await.unwrap();

    assert_eq!(downloaded.bytes, b"%PDF-1.4 fake");
    assert_eq!(downloaded.file_name.as_deref(), Some("your_ebook.pdf"));
    assert_eq!(downloaded.content_type.as_deref(), Some("application/pdf"));
}

#[tokio::test]
async fn download_of_missing_artifact_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/download"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "File not found"})))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server).await;
    let artifact = ResultArtifact {
        locator: gateway.config().download_url(),
    };
    let err = gateway.download(&artifact).await.unwrap_err();
    assert_eq!(err.user_message(), "File not found");
}
