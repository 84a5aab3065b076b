//! Common test utilities for in-process API testing.
//!
//! This module provides a test fixture that builds the router around a real
//! `AcquisitionService` whose extractor is the scripted fake, so requests
//! run end to end without network access.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use mixtape_core::{testing::FakeExtractor, AcquisitionService, Config};
use mixtape_server::{api::create_router, state::AppState};

/// Test fixture for API testing with the scripted extractor.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() {
///     let fixture = TestFixture::new();
///     let response = fixture.get("/api/v1/health").await;
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Shared state behind the router
    pub state: Arc<AppState>,
    /// Temporary directory holding the script and batch workspaces
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Response whose body is kept as raw bytes
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestFixture {
    /// Create a new test fixture with default settings.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a test fixture, adjusting the config first.
    pub fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config =
            FakeExtractor::test_config(temp_dir.path()).expect("Failed to install extractor");
        tweak(&mut config);

        let state = Arc::new(AppState::new(AcquisitionService::new(config)));
        let router = create_router(Arc::clone(&state));

        Self {
            router,
            state,
            temp_dir,
        }
    }

    /// Directory batch workspaces are created in.
    pub fn work_dir(&self) -> PathBuf {
        self.state.config().acquisition.temp_dir.clone()
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a GET request and keep the raw body.
    pub async fn get_raw(&self, path: &str) -> RawResponse {
        self.send_raw("GET", path, None).await
    }

    /// Send a POST request with JSON body and keep the raw body.
    pub async fn post_raw(&self, path: &str, body: Value) -> RawResponse {
        self.send_raw("POST", path, Some(body)).await
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let raw = self.send_raw(method, path, body).await;

        let body: Value = if raw.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&raw.body).unwrap_or(Value::Null)
        };

        TestResponse {
            status: raw.status,
            body,
        }
    }

    async fn send_raw(&self, method: &str, path: &str, body: Option<Value>) -> RawResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes()
            .to_vec();

        RawResponse {
            status,
            headers,
            body,
        }
    }
}

/// Archive entry names in archive order.
pub fn archive_names(bytes: &[u8]) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).expect("valid zip");
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Contents of one archive entry.
pub fn archive_entry(bytes: &[u8], name: &str) -> String {
    use std::io::Read;

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).expect("valid zip");
    let mut file = archive.by_name(name).expect("entry present");
    let mut contents = String::new();
    file.read_to_string(&mut contents).unwrap();
    contents
}
