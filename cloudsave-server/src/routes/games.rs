use super::{blocking, ok};
use crate::error::AppError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, OriginalUri, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use cloudsave::archive::BLOB_FILE_NAME;
use cloudsave::remote::fields;
use cloudsave::repository::BlobWriter;
use cloudsave::{Identifier, SaveRecord};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

/// Largest accepted upload body
pub const UPLOAD_LIMIT: usize = 500 << 20;

const BLOB_CONTENT_TYPE: &str = "application/zstd";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/games", get(list_games))
        .route("/api/v1/games/{id}/data", get(download).post(upload))
        .route("/api/v1/games/{id}/metadata", get(metadata))
        .route("/api/v1/games/{id}/hist", get(list_backups))
        .route(
            "/api/v1/games/{id}/hist/{uuid}/data",
            get(download_backup).post(upload_backup),
        )
        .route("/api/v1/games/{id}/hist/{uuid}/info", get(backup_info))
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
}

async fn list_games(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
) -> Result<impl IntoResponse, AppError> {
    let repository = state.repository.clone();
    let records = blocking(move || {
        repository
            .list_games()?
            .iter()
            .map(|game_id| repository.metadata(game_id))
            .collect::<cloudsave::Result<Vec<_>>>()
    })
    .await?;

    Ok(ok(&uri, records))
}

async fn metadata(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    Path(game_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let repository = state.repository.clone();
    let record = blocking(move || repository.metadata(&game_id)).await?;
    Ok(ok(&uri, record))
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    Path(game_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let repository = state.repository.clone();
    let backups = blocking(move || {
        repository.metadata(&game_id)?;
        repository.list_backups(&game_id)
    })
    .await?;

    Ok(ok(&uri, backups))
}

async fn backup_info(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    Path((game_id, backup_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let repository = state.repository.clone();
    let backup = blocking(move || repository.backup_info(&game_id, &backup_id)).await?;
    Ok(ok(&uri, backup))
}

async fn download(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    stream_blob(&state, Identifier::game(game_id)).await
}

async fn download_backup(
    State(state): State<Arc<AppState>>,
    Path((game_id, backup_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    stream_blob(&state, Identifier::backup(game_id, backup_id)).await
}

async fn stream_blob(state: &AppState, id: Identifier) -> Result<impl IntoResponse, AppError> {
    let repository = state.repository.clone();
    let (file, length) = blocking(move || {
        let file = repository.read_blob(&id)?;
        let length = file
            .metadata()
            .map_err(|e| cloudsave::SaveError::io(format!("[{}] failed to stat blob", id), e))?
            .len();
        Ok((file, length))
    })
    .await?;

    let body = Body::from_stream(ReaderStream::new(tokio::fs::File::from_std(file)));

    Ok((
        [
            (header::CONTENT_TYPE, BLOB_CONTENT_TYPE.to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", BLOB_FILE_NAME),
            ),
        ],
        body,
    ))
}

async fn upload(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
    multipart: Multipart,
) -> Result<StatusCode, AppError> {
    let form = receive(&state, Identifier::game(&game_id), multipart).await?;

    let name = form.required(fields::NAME)?.to_string();
    let version: u64 = form
        .required(fields::VERSION)?
        .parse()
        .map_err(|_| AppError::BadRequest("version must be a positive integer".into()))?;
    let date = form.date(fields::DATE)?.unwrap_or_else(Utc::now);
    let path = form.fields.get(fields::PATH).map(PathBuf::from);

    tracing::debug!(id = %game_id, version, "Receiving save upload");

    let repository = state.repository.clone();
    let id = game_id.clone();
    blocking(move || {
        let previous = match repository.metadata(&id) {
            Ok(record) => Some(record),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        form.writer.commit()?;

        let path = path
            .or_else(|| previous.map(|record| record.path))
            .unwrap_or_default();
        let mut record = SaveRecord::new(&id, name, path);
        record.version = version;
        record.date = date;
        repository.write_metadata(&id, &record)
    })
    .await?;

    tracing::info!(id = %game_id, version, "Save stored");
    Ok(StatusCode::CREATED)
}

async fn upload_backup(
    State(state): State<Arc<AppState>>,
    Path((game_id, backup_id)): Path<(String, String)>,
    multipart: Multipart,
) -> Result<StatusCode, AppError> {
    let repository = state.repository.clone();
    let id = game_id.clone();
    blocking(move || repository.metadata(&id).map(|_| ())).await?;

    let mut form = receive(&state, Identifier::backup(&game_id, &backup_id), multipart).await?;
    if let Some(created_at) = form.date(fields::CREATED_AT)? {
        form.writer.set_modified(created_at);
    }

    blocking(move || form.writer.commit()).await?;

    tracing::info!(id = %game_id, backup = %backup_id, "Backup stored");
    Ok(StatusCode::CREATED)
}

/// An upload whose payload has been spooled but not committed yet.
struct UploadForm {
    writer: BlobWriter,
    fields: HashMap<String, String>,
}

impl UploadForm {
    fn required(&self, name: &str) -> Result<&str, AppError> {
        self.fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| AppError::BadRequest(format!("missing form field {:?}", name)))
    }

    fn date(&self, name: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        self.fields
            .get(name)
            .map(|value| {
                DateTime::parse_from_rfc3339(value)
                    .map(|d| d.with_timezone(&Utc))
                    .map_err(|_| AppError::BadRequest(format!("{} must be an RFC 3339 date", name)))
            })
            .transpose()
    }
}

/// Spool the `payload` part into a blob writer for `id` and collect the text
/// fields. Nothing is visible until the caller commits the writer.
async fn receive(
    state: &AppState,
    id: Identifier,
    mut multipart: Multipart,
) -> Result<UploadForm, AppError> {
    let repository = state.repository.clone();
    let target = id.clone();
    let mut writer = Some(blocking(move || repository.write_blob(&target)).await?);
    let mut payload = None;
    let mut fields = HashMap::new();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if name != fields::PAYLOAD {
            let value = field.text().await.map_err(multipart_error)?;
            fields.insert(name, value);
            continue;
        }

        let Some(mut blob) = writer.take() else {
            return Err(AppError::BadRequest("duplicate payload".into()));
        };
        let mut received = 0u64;
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            received += chunk.len() as u64;
            blob = write_chunk(blob, chunk).await?;
        }

        tracing::debug!(id = %id, bytes = received, "Payload received");
        payload = Some(blob);
    }

    let writer = payload.ok_or_else(|| AppError::BadRequest("payload not found".into()))?;
    Ok(UploadForm { writer, fields })
}

async fn write_chunk(mut writer: BlobWriter, chunk: Bytes) -> Result<BlobWriter, AppError> {
    tokio::task::spawn_blocking(move || {
        writer.write_all(&chunk)?;
        Ok::<_, std::io::Error>(writer)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))?
    .map_err(|e| AppError::Internal(anyhow::anyhow!("Write error: {}", e)))
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(err.body_text())
    } else {
        AppError::BadRequest(err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::Credentials;
    use crate::routes::create_router;
    use crate::state::AppState;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use cloudsave::repository::{open, RepositoryMode};
    use cloudsave::{Identifier, Repository, SaveRecord};
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn setup() -> (TempDir, Arc<dyn Repository>, axum::Router) {
        let temp_dir = TempDir::new().unwrap();
        let repository = open(temp_dir.path(), RepositoryMode::Eager).unwrap();
        let mut credentials = Credentials::default();
        credentials.insert("alice", "secret", 4).unwrap();
        let app = create_router(Arc::new(AppState::new(repository.clone(), credentials)));
        (temp_dir, repository, app)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header(
                header::AUTHORIZATION,
                format!("Basic {}", STANDARD.encode("alice:secret")),
            )
            .body(Body::empty())
            .unwrap()
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn store(repository: &dyn Repository, game_id: &str, blob: &[u8]) {
        repository
            .write_metadata(game_id, &SaveRecord::new(game_id, "Celeste", "/saves/Celeste"))
            .unwrap();
        let mut writer = repository.write_blob(&Identifier::game(game_id)).unwrap();
        writer.write_all(blob).unwrap();
        writer.commit().unwrap();
    }

    #[tokio::test]
    async fn test_requires_credentials() {
        let (_temp, _repository, app) = setup();

        let response = app
            .oneshot(Request::get("/heartbeat").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
        let body = json(response).await;
        assert_eq!(body["status"], 401);
        assert_eq!(body["path"], "/heartbeat");
    }

    #[tokio::test]
    async fn test_heartbeat() {
        let (_temp, _repository, app) = setup();

        let response = app.oneshot(get("/heartbeat")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_metadata_envelope_carries_hash() {
        let (_temp, repository, app) = setup();
        store(repository.as_ref(), "g1", b"blob");

        let response = app.oneshot(get("/api/v1/games/g1/metadata")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        assert_eq!(body["status"], 200);
        assert_eq!(body["path"], "/api/v1/games/g1/metadata");
        assert_eq!(body["data"]["name"], "Celeste");
        assert_eq!(
            body["data"]["hash"],
            repository.metadata("g1").unwrap().hash.unwrap()
        );
    }

    #[tokio::test]
    async fn test_unknown_game_is_not_found() {
        let (_temp, _repository, app) = setup();

        let response = app.oneshot(get("/api/v1/games/nope/metadata")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json(response).await;
        assert_eq!(body["error"], "Not Found");
    }

    #[tokio::test]
    async fn test_unknown_route_uses_error_envelope() {
        let (_temp, _repository, app) = setup();

        let response = app.oneshot(get("/api/v2/games")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(response).await["message"], "This route does not exist");
    }

    #[tokio::test]
    async fn test_download_streams_blob() {
        let (_temp, repository, app) = setup();
        store(repository.as_ref(), "g1", b"compressed bytes");

        let response = app.oneshot(get("/api/v1/games/g1/data")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zstd");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"compressed bytes");
    }

    #[tokio::test]
    async fn test_upload_without_payload_is_rejected() {
        let (_temp, repository, app) = setup();

        let boundary = "X-BOUNDARY";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nCeleste\r\n--{b}--\r\n",
            b = boundary
        );
        let request = Request::post("/api/v1/games/g1/data")
            .header(
                header::AUTHORIZATION,
                format!("Basic {}", STANDARD.encode("alice:secret")),
            )
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(repository.list_games().unwrap().is_empty());
        assert!(repository.read_blob(&Identifier::game("g1")).is_err());
    }
}
