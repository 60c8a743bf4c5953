use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use runner_backend::mock::MockRunner;
use runner_engine::Engine;

fn test_app() -> axum::Router {
    let engine = Engine::new(4, 32, 2, 8, 4, Arc::new(MockRunner::new(2)));
    let handle = runner_engine::spawn(engine, Duration::from_millis(1));
    runner_api::app(handle)
}

#[tokio::test]
async fn healthz_reports_ok() {
    let app = test_app();
    let res = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn metrics_exposes_prometheus_text() {
    let app = test_app();
    let res = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn generate_runs_a_prompt_to_completion() {
    let app = test_app();
    let body = serde_json::json!({
        "prompt_tokens": [10, 11, 12],
        "sampling_params": {"max_tokens": 3, "ignore_eos": true}
    });
    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/generate")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let token_ids = parsed["token_ids"].as_array().unwrap();
    assert_eq!(token_ids.len(), 3);
}
