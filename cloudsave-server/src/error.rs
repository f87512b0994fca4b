use axum::extract::{OriginalUri, Request};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use cloudsave::remote::ErrorEnvelope;
use cloudsave::SaveError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("The request lacks valid authentication credentials")]
    Unauthorized,

    #[error("The resource does not support this method")]
    MethodNotAllowed,

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<SaveError> for AppError {
    fn from(err: SaveError) -> Self {
        match err {
            SaveError::NotFound(m) => AppError::NotFound(m),
            other => AppError::Internal(other.into()),
        }
    }
}

/// Message left on an error response for [`render_error_envelope`].
#[derive(Clone, Debug)]
struct ErrorMessage(String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, self.to_string()),
            AppError::PayloadTooLarge(m) => (StatusCode::PAYLOAD_TOO_LARGE, m.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "The server encountered an unexpected condition".into(),
                )
            }
        };

        let mut response = status.into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"cloudsave\""),
            );
        }
        response.extensions_mut().insert(ErrorMessage(msg));
        response
    }
}

/// Renders errors as `{status, timestamp, path, error, message}`. The request
/// path is only known here, so handlers leave the message on the response.
pub async fn render_error_envelope(
    OriginalUri(uri): OriginalUri,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let Some(ErrorMessage(message)) = response.extensions_mut().remove::<ErrorMessage>() else {
        return response;
    };

    let status = response.status();
    let envelope = ErrorEnvelope {
        status: status.as_u16(),
        timestamp: Utc::now(),
        path: uri.path().to_string(),
        error: status.canonical_reason().unwrap_or("Error").to_string(),
        message,
    };

    let (mut parts, _) = response.into_parts();
    let (rendered, body) = Json(envelope).into_response().into_parts();
    parts.headers.extend(rendered.headers);
    Response::from_parts(parts, body)
}
