// tests/routes_tests.rs

use std::io::Write;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use firmscan::dynamic::DynamicAnalysisOrchestrator;
use firmscan::extract::Extractor;
use firmscan::feed::VulnerabilityFeedCache;
use firmscan::pipeline::FirmwareAnalyzer;
use firmscan::routes::health_check;
use firmscan::{AppState, Config};
use reqwest::Client;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "---------------------------testboundary";

fn test_state(cache_dir: &TempDir) -> AppState {
    let config = Arc::new(Config {
        cache_dir: cache_dir.path().to_path_buf(),
        ..Config::default()
    });
    let client = Client::new();
    let feed = Arc::new(VulnerabilityFeedCache::from_config(&config, client.clone()));
    let orchestrator = Arc::new(DynamicAnalysisOrchestrator::qemu(config.dynamic.clone()));
    let analyzer = Arc::new(FirmwareAnalyzer::with_parts(
        Arc::clone(&config),
        Extractor::builtin(),
        feed,
        orchestrator,
    ));
    AppState::with_analyzer(config, client, analyzer)
}

fn multipart_body(field: &str, file_name: &str, contents: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    write!(
        data,
        "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
        BOUNDARY, field, file_name
    )
    .unwrap();
    data.extend_from_slice(contents);
    write!(data, "\r\n--{}--\r\n", BOUNDARY).unwrap();
    data
}

fn analyze_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/analyze")
        .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let body = health_check().await.0;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "firmscan");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_health_route() {
    let dir = TempDir::new().unwrap();
    let app = firmscan::server::app(test_state(&dir));
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_firmware_field_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = firmscan::server::app(test_state(&dir));

    let response = app
        .oneshot(analyze_request(multipart_body("file", "router.bin", b"data")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No firmware file provided");
}

#[tokio::test]
async fn test_empty_file_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = firmscan::server::app(test_state(&dir));

    let response = app
        .oneshot(analyze_request(multipart_body("firmware", "", b"data")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No selected file");
}

#[tokio::test]
async fn test_upload_returns_report_attachment() {
    let dir = TempDir::new().unwrap();
    let app = firmscan::server::app(test_state(&dir));

    let image = b"# startup script for the device web interface\nadmin_password = \"changeme123\"\ntelnetd -l /bin/sh &\n";
    let response = app
        .oneshot(analyze_request(multipart_body("firmware", "router.bin", image)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"router_"));
    assert!(disposition.ends_with("_results.json\""));

    let report = json_body(response).await;
    assert!(!report["static"]["credentials"].as_array().unwrap().is_empty());
    assert!(!report["static"]["services"].as_array().unwrap().is_empty());
    assert!(report["dynamic"]["open_ports"].as_array().unwrap().is_empty());
}
