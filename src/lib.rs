// Core modules
pub mod config;
pub mod db;
pub mod types;

// Authentication and authorization
pub mod access;
pub mod auth;

// HTTP surface
pub mod api;

// Re-export key types and functions
pub use access::{AccessChecker, AccessLevel, ResourceKind, ResourceRef, Role};
pub use api::{AppState, create_router, serve};
pub use auth::{AccessClaims, AuthError, AuthResult, AuthService, TokenCodec, TokenPair};
pub use config::AuthConfig;
pub use db::{DatabaseConfig, Db, create_connection, ensure_schema};

use anyhow::Result;

/// Connect, make sure the schema exists, and build the HTTP state.
pub async fn create_app_state(db_config: DatabaseConfig, auth_config: AuthConfig) -> Result<AppState> {
    auth_config.validate()?;

    let db = create_connection(db_config).await?;
    ensure_schema(&db).await?;

    let auth = AuthService::new(db.clone(), auth_config);
    Ok(AppState::new(auth, AccessChecker::new(db)))
}
