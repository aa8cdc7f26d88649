// Route definitions for the LambdaLite API

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::{handlers, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/invoke", post(handlers::invoke))
        .route("/compare", post(handlers::compare))
        .route("/metrics", get(handlers::all_metrics))
        .route("/metrics/:function_name", get(handlers::function_metrics))
        .route("/pool", get(handlers::pool_stats))
        .route("/status", get(handlers::health_check))
        .route("/prometheus", get(handlers::prometheus_metrics))
}
