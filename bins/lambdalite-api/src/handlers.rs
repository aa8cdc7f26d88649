// HTTP route handlers for the LambdaLite API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use lambdalite_common::types::{FunctionSpec, RuntimeSelector};
use lambdalite_common::FaasError;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{metrics, AppState};

#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    pub function_name: String,
    pub language: String,
    pub source_code: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// `standard`/`runc` or `sandboxed`/`runsc`; ignored by /compare
    #[serde(default)]
    pub runtime: Option<String>,
}

fn default_timeout() -> u64 {
    5
}

impl InvokeRequest {
    pub fn into_function(self) -> Result<FunctionSpec, FaasError> {
        let runtime = match self.runtime.as_deref() {
            Some(raw) => RuntimeSelector::from_str(raw)?,
            None => RuntimeSelector::Standard,
        };

        Ok(FunctionSpec {
            name: self.function_name,
            language: self.language,
            timeout_seconds: self.timeout_seconds,
            runtime,
            source_code: self.source_code,
        })
    }
}

pub fn status_for(err: &FaasError) -> StatusCode {
    if err.is_precondition() {
        StatusCode::BAD_REQUEST
    } else if matches!(err, FaasError::NotFound(_)) {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn error_response(err: &FaasError) -> Response {
    let status = status_for(err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %err, "Request failed");
    } else {
        warn!(error = %err, "Request rejected");
    }
    if err.is_precondition() {
        metrics::record_rejected(rejection_reason(err));
    }

    (
        status,
        Json(serde_json::json!({
            "error": err.to_string()
        })),
    )
        .into_response()
}

fn rejection_reason(err: &FaasError) -> &'static str {
    match err {
        FaasError::UnsupportedLanguage(_) => "unsupported_language",
        FaasError::UnsupportedRuntime(_) => "unsupported_runtime",
        FaasError::NoCodeProvided => "no_code",
        FaasError::InvalidTimeout(_) => "invalid_timeout",
        FaasError::SourceTooLarge { .. } => "source_too_large",
        _ => "other",
    }
}

/// POST /invoke - Run a function once
pub async fn invoke(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<InvokeRequest>,
) -> Response {
    let function = match payload.into_function() {
        Ok(function) => function,
        Err(e) => return error_response(&e),
    };

    match state.orchestrator.execute(&function).await {
        Ok(result) => {
            metrics::record_invocation(&result);
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// POST /compare - Run a function under both runtimes
pub async fn compare(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<InvokeRequest>,
) -> Response {
    let function = match payload.into_function() {
        Ok(function) => function,
        Err(e) => return error_response(&e),
    };

    match lambdalite_engine::compare(&state.orchestrator, &function).await {
        Ok(comparison) => {
            metrics::record_invocation(&comparison.standard);
            metrics::record_invocation(&comparison.sandboxed);
            (StatusCode::OK, Json(comparison)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// GET /metrics - Aggregates per (function, runtime)
pub async fn all_metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.orchestrator.metrics().aggregate().await {
        Ok(summaries) => {
            info!(groups = summaries.len(), "Metrics aggregated");
            (StatusCode::OK, Json(serde_json::json!({ "metrics": summaries }))).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// GET /metrics/{function_name} - Latest record of one function
pub async fn function_metrics(
    State(state): State<Arc<AppState>>,
    Path(function_name): Path<String>,
) -> Response {
    match state.orchestrator.metrics().most_recent(&function_name).await {
        Ok(record) => (StatusCode::OK, Json(serde_json::json!({ "metrics": record }))).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /pool - Warm pool snapshot
pub async fn pool_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.orchestrator.pool().stats()))
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /prometheus - Prometheus text exposition
pub async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    metrics::observe_pool(&state.orchestrator.pool().stats());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}
