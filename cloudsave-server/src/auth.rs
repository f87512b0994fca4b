//! HTTP Basic authentication against an htpasswd file of bcrypt hashes.

use crate::error::AppError;
use crate::state::AppState;
use anyhow::{bail, Context};
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Users and their bcrypt password hashes.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    users: HashMap<String, String>,
}

impl Credentials {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read credentials {}", path.display()))?;
        Self::parse(&content)
    }

    /// One `user:hash` per line as written by `htpasswd -B`; blank lines and
    /// `#` comments are skipped.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut users = HashMap::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (user, hash) = line
                .split_once(':')
                .with_context(|| format!("line {}: expected user:hash", number + 1))?;
            if !hash.starts_with("$2") {
                bail!("line {}: password of {} is not a bcrypt hash", number + 1, user);
            }
            users.insert(user.to_string(), hash.to_string());
        }
        Ok(Self { users })
    }

    /// Hash `password` at `cost` and register it for `user`.
    pub fn insert(
        &mut self,
        user: impl Into<String>,
        password: &str,
        cost: u32,
    ) -> anyhow::Result<()> {
        let hash = bcrypt::hash(password, cost).context("failed to hash password")?;
        self.users.insert(user.into(), hash);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// CPU bound: call from a blocking context.
    pub fn verify(&self, user: &str, password: &str) -> bool {
        self.users
            .get(user)
            .is_some_and(|hash| bcrypt::verify(password, hash).unwrap_or(false))
    }
}

fn decode_basic(value: &str) -> Option<(String, String)> {
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

pub async fn require_basic_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let supplied = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(decode_basic);

    let Some((user, password)) = supplied else {
        return Err(AppError::Unauthorized);
    };

    let verified = {
        let user = user.clone();
        tokio::task::spawn_blocking(move || state.credentials.verify(&user, &password))
            .await
            .map_err(|e| anyhow::anyhow!(e))?
    };

    if verified {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(user = %user, path = %request.uri().path(), "Rejected credentials");
        Err(AppError::Unauthorized)
    }
}
