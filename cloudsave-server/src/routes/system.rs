use super::ok;
use axum::extract::OriginalUri;
use axum::response::IntoResponse;
use cloudsave::models::ServerInfo;
use cloudsave::remote::API_VERSION;

/// Liveness check; sits behind authentication so it also validates credentials.
pub async fn heartbeat() -> &'static str {
    "OK"
}

pub async fn version(OriginalUri(uri): OriginalUri) -> impl IntoResponse {
    ok(
        &uri,
        ServerInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            api_version: API_VERSION,
            os_name: std::env::consts::OS.to_string(),
            os_architecture: std::env::consts::ARCH.to_string(),
        },
    )
}
