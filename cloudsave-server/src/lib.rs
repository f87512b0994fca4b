//! CloudSave server: serves the save datastore over the HTTP wire protocol
//! spoken by the `cloudsave` client.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use routes::create_router;
