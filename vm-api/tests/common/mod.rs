//! Common test utilities and helpers for vm-api tests

#![allow(dead_code)]

use axum::Router;
use std::sync::Arc;
use vm_orchestrator::test_utils::RecordingSink;
use vm_orchestrator::{Handlers, MemoryStatusStore, Options, DEFAULT_BOX};
use vm_provider::mock::{MockPortForwarding, MockVagrant};

/// Everything a test needs to drive the API and inspect side effects.
pub struct TestContext {
    pub client: TestClient,
    pub vagrant: MockVagrant,
    pub sink: RecordingSink,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with(MockVagrant::new(), MockPortForwarding::new())
    }

    pub fn with(vagrant: MockVagrant, ports: MockPortForwarding) -> Self {
        let sink = RecordingSink::new();
        let handlers = Handlers::new(Options {
            home: "/home/devbox".into(),
            username: "devbox-host".to_string(),
            default_box: DEFAULT_BOX.to_string(),
            vagrant: Arc::new(vagrant.clone()),
            ports: Arc::new(ports),
            store: Arc::new(MemoryStatusStore::new()),
            callbacks: Arc::new(sink.clone()),
        });

        Self {
            client: TestClient {
                app: vm_api::create_app(handlers),
            },
            vagrant,
            sink,
        }
    }
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: axum::response::Response) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
}

impl TestClient {
    /// Send a request to the API
    pub async fn send_request(
        &self,
        request: axum::http::Request<axum::body::Body>,
    ) -> axum::http::Response<axum::body::Body> {
        // Clone the app to allow reuse (Router is cheap to clone)
        use tower::ServiceExt;
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Call an RPC method as `user`
    pub async fn rpc(
        &self,
        method: &str,
        args: &serde_json::Value,
        user: Option<&str>,
    ) -> axum::http::Response<axum::body::Body> {
        let mut builder = axum::http::Request::builder()
            .method("POST")
            .uri(format!("/api/v1/rpc/{}", method))
            .header("content-type", "application/json");

        if let Some(user) = user {
            builder = builder.header("x-user", user);
        }

        let body = serde_json::to_string(args).expect("Failed to serialize request body");
        let request = builder.body(axum::body::Body::from(body)).unwrap();
        self.send_request(request).await
    }

    /// Get request to an endpoint
    pub async fn get(&self, uri: &str) -> axum::http::Response<axum::body::Body> {
        let request = axum::http::Request::builder()
            .method("GET")
            .uri(uri)
            .body(axum::body::Body::empty())
            .unwrap();
        self.send_request(request).await
    }
}
