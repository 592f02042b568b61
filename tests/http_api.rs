use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use followgraph::server::{router, AppState};
use followgraph::{CacheSettings, FollowGraph};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> Router {
    let graph = FollowGraph::in_memory(CacheSettings {
        batch_pause: Duration::from_millis(1),
        scan_page_size: 2,
        ..Default::default()
    })
    .unwrap();
    router(Arc::new(AppState { graph }))
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_follow_list_and_count() {
    let app = app();
    let (status, _) = send(&app, post("/follow", json!({"subject_id": 1, "target_id": 2, "kind": 1}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, get("/follows?subject_id=1&kind=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ids"], json!([2]));
    assert_eq!(body["has_more"], json!(false));

    let (_, body) = send(&app, get("/followers?subject_id=2")).await;
    assert_eq!(body["ids"], json!([1]));

    let (_, body) = send(&app, get("/counts?subject_id=2&kind=1")).await;
    assert_eq!(body, json!({"outgoing": 0, "incoming": 1}));
}

#[tokio::test]
async fn test_duplicate_follow_is_conflict() {
    let app = app();
    let req = json!({"subject_id": 1, "target_id": 2, "kind": 1});
    send(&app, post("/follow", req.clone())).await;

    let (status, body) = send(&app, post("/follow", req)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("Already following"));
}

#[tokio::test]
async fn test_unknown_kind_is_bad_request() {
    let app = app();
    let (status, body) = send(&app, post("/follow", json!({"subject_id": 1, "target_id": 2, "kind": 7}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = send(&app, get("/counts?subject_id=1&kind=7")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unfollow_missing_is_ok() {
    let app = app();
    let (status, _) = send(&app, post("/unfollow", json!({"subject_id": 4, "target_id": 5, "kind": 2}))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_export_routes_return_pages() {
    let app = app();
    for target in 10..13 {
        send(&app, post("/follow", json!({"subject_id": 1, "target_id": target, "kind": 1}))).await;
    }

    let (status, body) = send(&app, get("/export?subject_id=1&kind=1")).await;
    assert_eq!(status, StatusCode::OK);
    let total: usize = body["pages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|page| page.as_array().unwrap().len())
        .sum();
    assert_eq!(total, 3);

    let (status, body) = send(&app, get("/export/followers?subject_id=10")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pages"], json!([[1]]));
}

#[tokio::test]
async fn test_stats_route() {
    let app = app();
    send(&app, post("/follow", json!({"subject_id": 1, "target_id": 2, "kind": 1}))).await;
    send(&app, post("/follow", json!({"subject_id": 1, "target_id": 9, "kind": 2}))).await;

    let (status, body) = send(&app, get("/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["follows"], json!(1));
    assert_eq!(body["followers"], json!(1));
    assert_eq!(body["topic_follows"], json!(1));
}
