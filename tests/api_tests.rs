//! API integration tests.

use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::test_app;

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(method)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user-id", "tester")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::GET)
        .header("x-user-id", "tester")
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Poll the status endpoint until the run leaves the running state.
async fn wait_until_settled(app: &axum::Router, run_id: &str) -> Value {
    for _ in 0..200 {
        let response = app
            .clone()
            .oneshot(get_request(&format!("/runs/{run_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        if status["status"] != "running" {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("run {run_id} never settled");
}

/// Test that health endpoint works.
#[tokio::test]
async fn test_health_endpoint() {
    let ctx = test_app();

    let response = ctx.app.oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

/// Start a run, stream its live output, then tail the durable log.
#[tokio::test]
async fn test_run_stream_status_and_tail() {
    let ctx = test_app();

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/runs",
            json!({"prompt": "say hello", "workspace": "proj"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let run_id = response
        .headers()
        .get("x-run-id")
        .and_then(|h| h.to_str().ok())
        .unwrap()
        .to_string();
    let token = response
        .headers()
        .get("x-stream-token")
        .and_then(|h| h.to_str().ok())
        .unwrap()
        .to_string();
    assert!(!token.is_empty());
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok()),
        Some("application/x-ndjson")
    );

    // The live body carries both NDJSON lines and ends when the run does.
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let live = String::from_utf8(body.to_vec()).unwrap();
    assert_eq!(live.lines().count(), 2);
    assert!(live.contains("\"result\""));

    let status = wait_until_settled(&ctx.app, &run_id).await;
    assert_eq!(status["status"], "completed");
    assert_eq!(status["summary"]["session_id"], "s-int");
    assert_eq!(status["summary"]["output_tokens"], 7);
    assert_eq!(status["summary"]["model"], "opus-4.5");

    // Tail from the start: both lines, sentinel excluded, done reported.
    let response = ctx
        .app
        .clone()
        .oneshot(get_request(&format!("/runs/{run_id}/tail?offset=0")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let tail = body_json(response).await;
    assert_eq!(tail["lines"].as_array().unwrap().len(), 2);
    assert_eq!(tail["done"], true);
    assert!(
        !tail["lines"]
            .as_array()
            .unwrap()
            .iter()
            .any(|l| l.as_str().unwrap().contains("[DONE]"))
    );

    // Resuming from the returned offset replays nothing.
    let next_offset = tail["next_offset"].as_u64().unwrap();
    let response = ctx
        .app
        .clone()
        .oneshot(get_request(&format!(
            "/runs/{run_id}/tail?offset={next_offset}&wait=1"
        )))
        .await
        .unwrap();
    let tail = body_json(response).await;
    assert!(tail["lines"].as_array().unwrap().is_empty());
}

/// Runs are invisible to other users.
#[tokio::test]
async fn test_runs_are_user_scoped() {
    let ctx = test_app();

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/runs",
            json!({"prompt": "hi", "workspace": "proj"}),
        ))
        .await
        .unwrap();
    let run_id = response
        .headers()
        .get("x-run-id")
        .and_then(|h| h.to_str().ok())
        .unwrap()
        .to_string();

    let response = ctx
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/runs/{run_id}"))
                .method(Method::GET)
                .header("x-user-id", "someone-else")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Starting a run in an unknown workspace is a client error.
#[tokio::test]
async fn test_unknown_workspace_is_bad_request() {
    let ctx = test_app();

    let response = ctx
        .app
        .oneshot(json_request(
            Method::POST,
            "/runs",
            json!({"prompt": "hi", "workspace": "ghost"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
}

/// Unknown run ids are 404s.
#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let ctx = test_app();

    let response = ctx
        .app
        .clone()
        .oneshot(get_request("/runs/no-such-run"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = ctx
        .app
        .oneshot(get_request("/runs/no-such-run/tail?offset=0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Cancelling with a token that matches nothing is a quiet false; omitting
/// the token entirely is a 400.
#[tokio::test]
async fn test_cancel_validation_and_not_found() {
    let ctx = test_app();

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(Method::POST, "/runs/cancel", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = ctx
        .app
        .oneshot(json_request(
            Method::POST,
            "/runs/cancel",
            json!({"stream_token": "never-registered"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["cancelled"], false);
}

/// Cancel an in-flight run through its stream token.
#[tokio::test]
async fn test_cancel_live_run() {
    let ctx = test_app();

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/runs",
            json!({
                "prompt": "please SLEEP for a while",
                "workspace": "proj",
                "stream_token": "cancel-me"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let run_id = response
        .headers()
        .get("x-run-id")
        .and_then(|h| h.to_str().ok())
        .unwrap()
        .to_string();

    // Let the process spawn and register.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/runs/cancel",
            json!({"stream_token": "cancel-me"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["cancelled"], true);

    let status = wait_until_settled(&ctx.app, &run_id).await;
    assert_eq!(status["status"], "cancelled");

    // The durable log is sealed even for a cancelled run, so a tail reports
    // done rather than waiting out its budget.
    let response = ctx
        .app
        .clone()
        .oneshot(get_request(&format!("/runs/{run_id}/tail?offset=0&wait=1")))
        .await
        .unwrap();
    let tail = body_json(response).await;
    assert_eq!(tail["done"], true);
    assert_eq!(tail["status"], "cancelled");
}

/// Workspace listing surfaces directories under the configured root.
#[tokio::test]
async fn test_list_workspaces() {
    let ctx = test_app();

    let response = ctx.app.oneshot(get_request("/workspaces")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let names: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["proj"]);
}

/// Without a credentials file the usage endpoint reports unavailability
/// rather than failing silently.
#[tokio::test]
async fn test_usage_without_credentials_is_unavailable() {
    let ctx = test_app();

    let response = ctx.app.oneshot(get_request("/usage")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["code"], "SERVICE_UNAVAILABLE");
}
