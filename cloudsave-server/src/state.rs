use crate::auth::Credentials;
use cloudsave::Repository;
use std::sync::Arc;

pub struct AppState {
    pub repository: Arc<dyn Repository>,
    pub credentials: Credentials,
}

impl AppState {
    pub fn new(repository: Arc<dyn Repository>, credentials: Credentials) -> Self {
        Self {
            repository,
            credentials,
        }
    }
}
