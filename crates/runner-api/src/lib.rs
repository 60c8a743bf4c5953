//! Thin HTTP façade over a running `runner-engine::Handle`.
//!
//! Deliberately small: health/readiness, Prometheus `/metrics`, and a single
//! `POST /generate` that blocks until the full completion is ready. No
//! streaming, no chat-completions compatibility layer, no admin surface --
//! those are outer-service concerns this workspace doesn't own.

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, TextEncoder};

use runner_core::SamplingParams;
use runner_engine::Handle;

static ENCODER: Lazy<TextEncoder> = Lazy::new(TextEncoder::new);

#[derive(Clone)]
struct AppState {
    engine: Handle,
    requests_total: IntCounter,
}

pub fn app(engine: Handle) -> Router {
    runner_obs::init();
    runner_obs::spawn_gpu_polling();

    let state = AppState {
        engine,
        requests_total: prometheus::register_int_counter!(
            "runner_requests_total",
            "Total number of /generate requests"
        )
        .expect("counter registration"),
    };

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/generate", post(generate))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(_state): State<AppState>) -> &'static str {
    "ready"
}

async fn metrics() -> impl IntoResponse {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    ENCODER.encode(&metric_families, &mut buffer).unwrap();
    ([("content-type", ENCODER.format_type().to_string())], buffer)
}

#[derive(serde::Deserialize)]
struct GenerateRequest {
    prompt_tokens: Vec<u32>,
    #[serde(default)]
    sampling_params: Option<SamplingParams>,
}

#[derive(serde::Serialize)]
struct GenerateResponse {
    token_ids: Vec<u32>,
}

#[derive(serde::Serialize)]
struct ErrorResponse {
    error: String,
}

async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, (axum::http::StatusCode, Json<ErrorResponse>)> {
    state.requests_total.inc();
    let sampling_params = req.sampling_params.unwrap_or_default();

    match state.engine.generate(req.prompt_tokens, sampling_params).await {
        Ok(token_ids) => Ok(Json(GenerateResponse { token_ids })),
        Err(e) => {
            tracing::warn!(error = %e, "generate request failed");
            Err((
                axum::http::StatusCode::BAD_REQUEST,
                Json(ErrorResponse { error: e.to_string() }),
            ))
        }
    }
}
