use cloudsave::repository;
use cloudsave::utils::shutdown::wait_for_signal;
use cloudsave_server::auth::Credentials;
use cloudsave_server::config::AppConfig;
use cloudsave_server::create_router;
use cloudsave_server::state::AppState;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .init();

    tracing::info!(
        "CloudSave server v{} ({}/{})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    let credentials = Credentials::load(&config.credentials_path)?;
    tracing::info!("{} user(s) loaded", credentials.len());
    if credentials.is_empty() {
        tracing::warn!("No users configured, every request will be rejected");
    }

    let mode = config.repository_mode();
    tracing::info!(?mode, path = %config.data_dir.display(), "Loading datastore");
    let repository = repository::open(&config.data_dir, mode)?;

    let state = Arc::new(AppState::new(repository, credentials));
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
