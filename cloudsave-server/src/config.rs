use cloudsave::repository::RepositoryMode;
use std::path::PathBuf;

const DEFAULT_DOCUMENT_ROOT: &str = "/var/lib/cloudsave";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub document_root: PathBuf,
    pub data_dir: PathBuf,
    pub credentials_path: PathBuf,
    pub no_cache: bool,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let document_root = PathBuf::from(
            std::env::var("CLOUDSAVE_DOCUMENT_ROOT").unwrap_or_else(|_| DEFAULT_DOCUMENT_ROOT.into()),
        );

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            data_dir: document_root.join("data"),
            credentials_path: std::env::var("CLOUDSAVE_CREDENTIALS")
                .map(PathBuf::from)
                .unwrap_or_else(|_| document_root.join(".htpasswd")),
            no_cache: std::env::var("CLOUDSAVE_NO_CACHE")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            document_root,
        }
    }

    /// Caching flavor unless the cache is disabled.
    pub fn repository_mode(&self) -> RepositoryMode {
        if self.no_cache {
            RepositoryMode::Lazy
        } else {
            RepositoryMode::Eager
        }
    }
}
