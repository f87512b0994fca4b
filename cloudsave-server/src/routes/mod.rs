pub mod games;
pub mod system;

use crate::auth::require_basic_auth;
use crate::error::{render_error_envelope, AppError};
use crate::state::AppState;
use axum::http::Uri;
use axum::routing::get;
use axum::{middleware, Json, Router};
use chrono::Utc;
use cloudsave::remote::Envelope;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/heartbeat", get(system::heartbeat))
        .route("/api/v1/version", get(system::version))
        .merge(games::router())
        .fallback(|| async { AppError::NotFound("This route does not exist".into()) })
        .method_not_allowed_fallback(|| async { AppError::MethodNotAllowed })
        .layer(middleware::from_fn_with_state(state.clone(), require_basic_auth))
        .layer(middleware::from_fn(render_error_envelope))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wraps `data` in the success envelope.
fn ok<T: Serialize>(uri: &Uri, data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        status: 200,
        timestamp: Utc::now(),
        path: uri.path().to_string(),
        data,
    })
}

/// Runs a repository call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> cloudsave::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow::anyhow!(e))?
        .map_err(AppError::from)
}
