//! Integration tests for the RPC endpoint
//!
//! Drives the HTTP surface against mocked Vagrant and VirtualBox tools and
//! checks status codes, response bodies and callback delivery.

mod common;

use axum::http::StatusCode;
use common::{extract_json_body, TestContext};
use serde_json::{json, Value};
use std::time::Duration;
use vm_orchestrator::DEFAULT_BOX;
use vm_provider::mock::{BoxOutcome, MockPortForwarding, MockVagrant};
use vm_provider::ForwardedPort;

#[tokio::test]
async fn test_health_endpoint() {
    let ctx = TestContext::new();

    let response = ctx.client.get("/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_version_returns_result() {
    let ctx = TestContext::new();

    let response = ctx
        .client
        .rpc("vagrant.version", &json!({ "filePath": "/vm/a" }), Some("alice"))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body, json!({ "result": "2.4.1" }));
}

#[tokio::test]
async fn test_create_uses_caller_as_username() {
    let ctx = TestContext::new();

    let response = ctx
        .client
        .rpc("vagrant.create", &json!({ "filePath": "/vm/a" }), Some("alice"))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["result"]["username"], "alice");
    assert_eq!(body["result"]["hostname"], "devbox-host");
    assert_eq!(body["result"]["box"], DEFAULT_BOX);
    assert_eq!(body["result"]["filePath"], "/vm/a");
}

#[tokio::test]
async fn test_create_without_user_runs_as_anonymous() {
    let ctx = TestContext::new();

    let response = ctx
        .client
        .rpc("vagrant.create", &json!({ "filePath": "/vm/a" }), None)
        .await;

    let body: Value = extract_json_body(response).await;
    assert_eq!(body["result"]["username"], "anonymous");
}

#[tokio::test]
async fn test_missing_file_path_is_bad_request() {
    let ctx = TestContext::new();

    let response = ctx
        .client
        .rpc("vagrant.status", &json!({}), Some("alice"))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["error"], "[filePath] is missing");
}

#[tokio::test]
async fn test_unknown_method_is_bad_request() {
    let ctx = TestContext::new();

    let response = ctx
        .client
        .rpc("vagrant.reboot", &json!({ "filePath": "/vm/a" }), Some("alice"))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rejected_path_is_not_found() {
    let ctx = TestContext::with(
        MockVagrant::new().reject("/vm/missing"),
        MockPortForwarding::new(),
    );

    let response = ctx
        .client
        .rpc("vagrant.status", &json!({ "filePath": "/vm/missing" }), Some("alice"))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_forwarded_ports() {
    let ports = MockPortForwarding::new().with_vm(
        "web_1600000000",
        vec![ForwardedPort {
            guest_port: 80,
            host_port: 8080,
        }],
    );
    let ctx = TestContext::with(MockVagrant::new(), ports);

    let response = ctx
        .client
        .rpc("vagrant.forwardedPorts", &json!({ "name": "web" }), Some("alice"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["result"], json!([{ "guest": 80, "host": 8080 }]));

    let response = ctx
        .client
        .rpc("vagrant.forwardedPorts", &json!({ "name": "db" }), Some("alice"))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_up_acknowledges_then_fires_success() {
    let ctx = TestContext::with(
        MockVagrant::new().with_box_delay(Duration::from_millis(50)),
        MockPortForwarding::new(),
    );

    let args = json!({
        "filePath": "/vm/a",
        "success": "http://callbacks/success",
        "failure": "http://callbacks/failure",
    });
    let response = ctx.client.rpc("vagrant.up", &args, Some("alice")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body, json!({ "result": true }));

    assert!(ctx.sink.wait_for("http://callbacks/success", 1).await);
    assert_eq!(ctx.sink.count("http://callbacks/failure"), 0);
    assert_eq!(ctx.vagrant.box_add_calls(DEFAULT_BOX), 1);
}

#[tokio::test]
async fn test_up_with_failed_box_is_server_error() {
    let vagrant = MockVagrant::new()
        .with_box_delay(Duration::from_millis(100))
        .with_box_outcomes(vec![
            BoxOutcome::Fail("network unreachable".into()),
            BoxOutcome::Fail("network unreachable".into()),
        ]);
    let ctx = TestContext::with(vagrant, MockPortForwarding::new());

    let args = json!({
        "filePath": "/vm/a",
        "success": "http://callbacks/success",
        "failure": "http://callbacks/failure",
    });
    let response = ctx.client.rpc("vagrant.up", &args, Some("alice")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = extract_json_body(response).await;
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("network unreachable"));
    assert!(ctx.vagrant.commands().is_empty());
}
