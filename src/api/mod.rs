// REST endpoints for authentication and access verdicts

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequestParts, Path, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{MethodRouter, get, post},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::access::{AccessChecker, ResourceKind, ResourceRef};
use crate::auth::{
    AccessClaims, AuthError, AuthResult, AuthService, SignInRequest, SignUpRequest, TokenPair,
    bearer_token, clear_refresh_cookie, refresh_cookie, refresh_token,
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub access: AccessChecker,
}

impl AppState {
    pub fn new(auth: AuthService, access: AccessChecker) -> Self {
        Self {
            auth: Arc::new(auth),
            access,
        }
    }
}

/// Claims of a verified bearer token.
#[derive(Debug, Clone)]
pub struct Authenticated(pub AccessClaims);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let claims = state.auth.authenticate(token)?;
        Ok(Self(claims))
    }
}

#[derive(Debug, Deserialize)]
struct RevokeSessionsRequest {
    user_id: i64,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", only(get(health_check)))
        .route("/api/users/signin", only(post(sign_in)))
        .route("/api/users/signup", only(post(sign_up)))
        .route("/api/auth/refresh", only(post(refresh)))
        .route("/api/auth/logout", only(post(logout)))
        .route("/api/auth/sessions/revoke", only(post(revoke_sessions)))
        .route("/api/auth/me", only(get(me)))
        .route("/api/access/{kind}/{id}", only(get(access_level)))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

/// Restrict a route to its declared methods, answering 405 otherwise.
fn only(route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.fallback(method_not_allowed)
}

async fn method_not_allowed() -> AuthError {
    AuthError::MethodNotAllowed
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> AuthResult<T> {
    serde_json::from_slice(body).map_err(|_| AuthError::MalformedBody)
}

fn token_response(state: &AppState, pair: TokenPair) -> Response {
    let config = state.auth.config();
    let cookie = refresh_cookie(
        &pair.refresh_token,
        config.refresh_lifetime().num_seconds(),
        config.secure_cookies,
    );
    (StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(pair)).into_response()
}

async fn health_check() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn sign_in(State(state): State<AppState>, body: Bytes) -> Result<Response, AuthError> {
    let req: SignInRequest = parse_body(&body)?;
    let pair = state.auth.sign_in(&req).await?;
    Ok(token_response(&state, pair))
}

async fn sign_up(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, AuthError> {
    let req: SignUpRequest = parse_body(&body)?;
    state.auth.sign_up(&req).await?;
    Ok(StatusCode::OK)
}

async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AuthError> {
    let token = refresh_token(&headers, &body)?;
    let pair = state.auth.refresh(&token).await?;
    Ok(token_response(&state, pair))
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AuthError> {
    let token = refresh_token(&headers, &body)?;
    state.auth.logout(&token).await?;

    let cookie = clear_refresh_cookie(state.auth.config().secure_cookies);
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)]).into_response())
}

async fn revoke_sessions(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
    body: Bytes,
) -> Result<Json<Value>, AuthError> {
    let req: RevokeSessionsRequest = parse_body(&body)?;
    let revoked = state.auth.force_logout(&claims, req.user_id).await?;
    Ok(Json(serde_json::json!({
        "user_id": req.user_id,
        "revoked": revoked,
    })))
}

async fn me(Authenticated(claims): Authenticated) -> Json<AccessClaims> {
    Json(claims)
}

/// Access verdict for resource handlers: `{"access": 0|1|2}`.
async fn access_level(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<Value>, AuthError> {
    let kind: ResourceKind = kind.parse()?;
    let id: i64 = id
        .parse()
        .map_err(|_| AuthError::InvalidInput(format!("invalid {} id", kind)))?;

    let level = state
        .access
        .access_level(&claims, ResourceRef::new(kind, id))
        .await?;
    Ok(Json(serde_json::json!({ "access": level })))
}

mod integration_tests;
