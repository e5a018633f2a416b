//! HTTP surface contract tests driven through the router with `oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use elytra_catalog::DatasetCatalog;
use elytra_server::{build_router, build_state};

struct TestApp {
    app: Router,
    _root: tempfile::TempDir,
}

fn test_app() -> TestApp {
    let root = tempfile::tempdir().expect("tempdir");
    let catalog = Arc::new(DatasetCatalog::new(root.path()));
    let app = build_router(build_state(catalog, None));
    TestApp { app, _root: root }
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

fn register_body(name: &str, row_groups: Value) -> Value {
    json!({
        "name": name,
        "storageKey": format!("{name}.parquet"),
        "bucket": "elytra-data",
        "rowGroups": row_groups,
    })
}

#[tokio::test]
async fn register_list_delete_round_trip() {
    let t = test_app();

    let response = t
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/register-dataset",
            register_body(
                "trips",
                json!([
                    {"id": 0, "rowCount": 10},
                    {"id": 1, "rowCount": 10},
                    {"id": 2, "rowCount": 10},
                ]),
            ),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let registered = body_json(response).await;
    assert_eq!(registered["rowGroupCount"], json!(3));
    let dataset_id = registered["datasetId"].as_str().expect("id").to_string();

    let response = t
        .app
        .clone()
        .oneshot(get_request("/api/datasets"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed[0]["id"], json!(dataset_id));
    assert_eq!(listed[0]["name"], json!("trips"));
    assert_eq!(listed[0]["rowGroupCount"], json!(3));
    assert_eq!(listed[0]["format"], json!("parquet"));

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/datasets/{dataset_id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"ok": true}));

    let response = t
        .app
        .clone()
        .oneshot(get_request("/api/datasets"))
        .await
        .expect("response");
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test]
async fn register_rejects_malformed_row_groups() {
    let t = test_app();

    for row_groups in [
        json!([]),
        json!([{"id": 1, "rowCount": 10}]),
        json!([{"id": 0, "rowCount": 0}]),
    ] {
        let response = t
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/register-dataset",
                register_body("bad", row_groups),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());
    }
}

#[tokio::test]
async fn delete_unknown_dataset_is_404() {
    let t = test_app();
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/datasets/nosuchid")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_json(response).await["error"].is_string());
}

#[tokio::test]
async fn submit_without_api_key_is_401() {
    let t = test_app();
    for body in [
        json!({"datasetId": "any", "ops": [{"type": "count"}]}),
        json!({"apiKey": "", "datasetId": "any", "ops": [{"type": "count"}]}),
    ] {
        let response = t
            .app
            .clone()
            .oneshot(json_request("POST", "/api/jobs", body))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn submit_against_unknown_dataset_is_404() {
    let t = test_app();
    let response = t
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/jobs",
            json!({"apiKey": "k", "datasetId": "missing", "ops": [{"type": "count"}]}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn submit_with_no_workers_is_503() {
    let t = test_app();
    let response = t
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/register-dataset",
            register_body("idle", json!([{"id": 0, "rowCount": 5}])),
        ))
        .await
        .expect("response");
    let dataset_id = body_json(response).await["datasetId"]
        .as_str()
        .expect("id")
        .to_string();

    let response = t
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/jobs",
            json!({"apiKey": "k", "datasetId": dataset_id, "ops": [{"type": "count"}]}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body_json(response).await,
        json!({"error": "No workers available"})
    );
}

#[tokio::test]
async fn submit_with_empty_pipeline_is_400() {
    let t = test_app();
    let response = t
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/jobs",
            json!({"apiKey": "k", "datasetId": "any", "ops": []}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_and_metrics_endpoints_respond() {
    let t = test_app();

    let response = t
        .app
        .clone()
        .oneshot(get_request("/healthz"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));

    let response = t
        .app
        .clone()
        .oneshot(get_request("/metrics"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let text = String::from_utf8(bytes.to_vec()).expect("utf8");
    assert!(text.contains("elytra_"));
}
