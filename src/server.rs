//! HTTP surface: a thin axum layer over the pipeline.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use digit_ocr::ImageRecognizer;
use portal_driver::DriverFactory;
use serde_json::json;
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::ErrorCode;
use crate::pipeline::{self, ScrapeRequest, ScrapeResponse};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub factory: Arc<dyn DriverFactory>,
    pub recognizer: Arc<dyn ImageRecognizer>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/attendance", post(attendance_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn attendance_handler(
    State(state): State<AppState>,
    Json(request): Json<ScrapeRequest>,
) -> impl IntoResponse {
    let Some((credentials, query)) = request.validate() else {
        debug!(target: "server", "rejected request with missing parameters");
        return (
            StatusCode::BAD_REQUEST,
            Json(ScrapeResponse::failure(
                ErrorCode::InvalidParameters,
                "Missing required parameters",
                None,
            )),
        );
    };

    let response = pipeline::scrape(
        &state.config,
        state.factory.as_ref(),
        Arc::clone(&state.recognizer),
        credentials,
        query,
    )
    .await;

    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(response))
}
