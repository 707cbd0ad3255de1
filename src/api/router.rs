use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::api::error::ApiError;
use crate::api::types::{AnalyzeRequest, AnalyzeResponse, HealthResponse, ModelsLoaded};
use crate::codec::decode_base64_image;
use crate::pipeline::LeafAnalyzer;

/// Shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    analyzer: Arc<LeafAnalyzer>,
    permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(analyzer: LeafAnalyzer, max_concurrent: usize) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }
}

pub fn build_router(state: AppState, max_body_bytes: usize, timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .route("/api/analyze", post(analyze))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TimeoutLayer::new(timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        models_loaded: ModelsLoaded {
            unet: true,
            classifier: state.analyzer.has_classifier(),
        },
    })
}

async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            tracing::debug!(%rejection, "unreadable analyze request");
            ApiError::NoImage
        }
    })?;

    let image = request
        .image
        .filter(|image| !image.trim().is_empty())
        .ok_or(ApiError::NoImage)?;

    let permit = state
        .permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::Unavailable)?;

    tracing::debug!(
        bytes = image.len(),
        mime_type = request.mime_type.as_deref(),
        "analysing image"
    );

    let analyzer = Arc::clone(&state.analyzer);
    // held until the analysis finishes, even when the request has timed out
    let response = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let decoded = decode_base64_image(&image)?;
        let analysis = analyzer.analyze(&decoded)?;
        AnalyzeResponse::from_analysis(analysis)
    })
    .await
    .map_err(|e| ApiError::Analysis(format!("worker task failed: {e}")))??;

    Ok(Json(response))
}
