//! HTTP implementation of [`TransferClient`] speaking the CloudSave wire
//! protocol (Basic auth, JSON envelopes, multipart uploads).

use super::progress::UploadProgress;
use super::{fields, Connector, Envelope, ErrorEnvelope, TransferClient};
use crate::archive::BLOB_FILE_NAME;
use crate::config::{Config, RemoteConfig};
use crate::models::{Backup, SaveRecord, ServerInfo};
use crate::utils::errors::{Result, SaveError};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::debug;

const BLOB_CONTENT_TYPE: &str = "application/zstd";

pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    timeout: Option<Duration>,
}

impl HttpClient {
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("cloudsave/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.connect_timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(segment);
        }
        url
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    /// Map non-success statuses onto the error taxonomy.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let path = response.url().path().to_string();
        let message = match response.json::<ErrorEnvelope>().await {
            Ok(body) => body.message,
            Err(_) => status.to_string(),
        };

        Err(match status {
            StatusCode::UNAUTHORIZED => SaveError::Unauthorized(message),
            StatusCode::NOT_FOUND => SaveError::NotFound(format!("{}: {}", path, message)),
            _ => SaveError::Remote(format!("{} returned {}: {}", path, status, message)),
        })
    }

    /// GET a JSON endpoint and unwrap the envelope's `data`.
    async fn get_data<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.url(segments);
        let mut request = self.request(Method::GET, &url);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = Self::check(request.send().await?).await?;
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| SaveError::Remote(format!("invalid payload from {}: {}", url, e)))?;
        Ok(envelope.data)
    }

    fn blob_part(&self, blob: File, label: String) -> Result<Part> {
        let length = blob
            .metadata()
            .map_err(|e| SaveError::io(format!("[{}] failed to stat blob", label), e))?
            .len();

        let stream = UploadProgress::new(
            ReaderStream::new(tokio::fs::File::from_std(blob)),
            label,
            length,
        );

        Ok(Part::stream_with_length(reqwest::Body::wrap_stream(stream), length)
            .file_name(BLOB_FILE_NAME)
            .mime_str(BLOB_CONTENT_TYPE)?)
    }

    async fn upload(&self, segments: &[&str], form: Form) -> Result<()> {
        let response = self
            .request(Method::POST, &self.url(segments))
            .multipart(form)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn download(&self, segments: &[&str], dest: &mut (dyn Write + Send)) -> Result<()> {
        let url = self.url(segments);
        let response = Self::check(self.request(Method::GET, &url).send().await?).await?;

        let mut received = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            dest.write_all(&chunk)
                .map_err(|e| SaveError::io(format!("failed to store {}", url), e))?;
            received += chunk.len() as u64;
        }

        debug!(url = %url, bytes = received, "download complete");
        Ok(())
    }
}

#[async_trait]
impl TransferClient for HttpClient {
    async fn ping(&self) -> Result<()> {
        let mut request = self.request(Method::GET, &self.url(&["heartbeat"]));
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        Self::check(request.send().await?).await?;
        Ok(())
    }

    async fn version(&self) -> Result<ServerInfo> {
        self.get_data(&["api", "v1", "version"]).await
    }

    async fn list_games(&self) -> Result<Vec<SaveRecord>> {
        self.get_data(&["api", "v1", "games"]).await
    }

    async fn exists(&self, game_id: &str) -> Result<bool> {
        match self.metadata(game_id).await {
            Ok(_) => Ok(true),
            Err(SaveError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn metadata(&self, game_id: &str) -> Result<SaveRecord> {
        self.get_data(&["api", "v1", "games", game_id, "metadata"]).await
    }

    async fn list_backups(&self, game_id: &str) -> Result<Vec<String>> {
        self.get_data(&["api", "v1", "games", game_id, "hist"]).await
    }

    async fn backup_info(&self, game_id: &str, backup_id: &str) -> Result<Backup> {
        self.get_data(&["api", "v1", "games", game_id, "hist", backup_id, "info"])
            .await
    }

    async fn push_save(&self, record: &SaveRecord, blob: File) -> Result<()> {
        let form = Form::new()
            .part(fields::PAYLOAD, self.blob_part(blob, record.id.clone())?)
            .text(fields::NAME, record.name.clone())
            .text(fields::VERSION, record.version.to_string())
            .text(fields::DATE, record.date.to_rfc3339())
            .text(fields::PATH, record.path.to_string_lossy().to_string());

        self.upload(&["api", "v1", "games", &record.id, "data"], form)
            .await
    }

    async fn push_backup(&self, game_id: &str, backup: &Backup, blob: File) -> Result<()> {
        let label = format!("{}:{}", game_id, backup.uuid);
        let form = Form::new()
            .part(fields::PAYLOAD, self.blob_part(blob, label)?)
            .text(fields::CREATED_AT, backup.created_at.to_rfc3339());

        self.upload(
            &["api", "v1", "games", game_id, "hist", &backup.uuid, "data"],
            form,
        )
        .await
    }

    async fn pull(&self, game_id: &str, dest: &mut (dyn Write + Send)) -> Result<()> {
        self.download(&["api", "v1", "games", game_id, "data"], dest)
            .await
    }

    async fn pull_backup(
        &self,
        game_id: &str,
        backup_id: &str,
        dest: &mut (dyn Write + Send),
    ) -> Result<()> {
        self.download(
            &["api", "v1", "games", game_id, "hist", backup_id, "data"],
            dest,
        )
        .await
    }
}

/// Builds one [`HttpClient`] per remote URL from configured credentials.
pub struct HttpConnector {
    remotes: Vec<RemoteConfig>,
    fallback: Option<(String, String)>,
    timeout: Option<Duration>,
    clients: DashMap<String, Arc<dyn TransferClient>>,
}

impl HttpConnector {
    pub fn new(remotes: Vec<RemoteConfig>, timeout: Option<Duration>) -> Self {
        Self {
            remotes,
            fallback: None,
            timeout,
            clients: DashMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut connector = Self::new(config.remotes.clone(), config.timeout());
        connector.fallback = config.default_credentials.clone();
        connector
    }
}

impl Connector for HttpConnector {
    fn connect(&self, url: &str) -> Result<Arc<dyn TransferClient>> {
        let url = url.trim_end_matches('/');
        if let Some(client) = self.clients.get(url) {
            return Ok(Arc::clone(client.value()));
        }

        let (username, password) = self
            .remotes
            .iter()
            .find(|remote| remote.url.trim_end_matches('/') == url)
            .map(|remote| (remote.username.clone(), remote.password.clone()))
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| SaveError::Config(format!("no credentials configured for {}", url)))?;

        let client: Arc<dyn TransferClient> =
            Arc::new(HttpClient::new(url, username, password, self.timeout)?);
        self.clients.insert(url.to_string(), Arc::clone(&client));
        Ok(client)
    }
}
