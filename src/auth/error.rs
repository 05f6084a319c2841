//! Error taxonomy for authentication and authorization.
//!
//! Every variant maps to exactly one HTTP status. Storage and signing faults
//! are kept apart from ordinary domain errors so they can be logged before a
//! generic 500 is returned.

use std::fmt;

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;

/// Authentication and authorization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No token in the header, cookie or body
    TokenNotProvided,
    /// Authorization header present but not `Bearer <token>`
    TokenNotValid,
    /// Signature missing, malformed, or not produced by our secret
    InvalidToken,
    /// Valid signature, but `exp` has passed (also used for expired sessions)
    TokenExpired,
    /// No session row for the presented refresh token
    SessionNotFound,
    /// Credentials matched no user, or the session owner is gone
    UserNotFound,
    /// Duplicate email on sign-up
    UserExists,
    /// Request body is not the expected JSON
    MalformedBody,
    /// Field failed shape validation
    InvalidInput(String),
    RoleNotFound,
    DepartmentNotFound,
    GroupNotFound,
    /// Referenced course, info page, lab or test is absent
    ResourceNotFound(String),
    /// Sign-up into the administrative department
    DepartmentRestricted,
    /// Role or course membership insufficient
    AccessDenied,
    MethodNotAllowed,
    /// Storage failure
    Database(String),
    /// Signing backend or randomness failure
    Internal(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenNotProvided => write!(f, "token not provided"),
            Self::TokenNotValid => write!(f, "provided token not valid"),
            Self::InvalidToken => write!(f, "invalid token"),
            Self::TokenExpired => write!(f, "token expired"),
            Self::SessionNotFound => write!(f, "session for this token doesn't exist"),
            Self::UserNotFound => write!(f, "user not found"),
            Self::UserExists => write!(f, "user with this email already exists"),
            Self::MalformedBody => write!(f, "unable to unmarshal body"),
            Self::InvalidInput(msg) => write!(f, "{}", msg),
            Self::RoleNotFound => write!(f, "role with this id not found"),
            Self::DepartmentNotFound => write!(f, "department not found"),
            Self::GroupNotFound => write!(f, "group not found"),
            Self::ResourceNotFound(what) => write!(f, "{} not found", what),
            Self::DepartmentRestricted => {
                write!(f, "this department can be set only by admins")
            }
            Self::AccessDenied => write!(f, "permission denied"),
            Self::MethodNotAllowed => write!(f, "method not allowed"),
            Self::Database(msg) => write!(f, "Database error: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<surrealdb::Error> for AuthError {
    fn from(err: surrealdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl AuthError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedBody | Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::TokenNotProvided
            | Self::TokenNotValid
            | Self::InvalidToken
            | Self::TokenExpired
            | Self::SessionNotFound
            | Self::UserNotFound => StatusCode::UNAUTHORIZED,
            Self::DepartmentRestricted | Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::RoleNotFound
            | Self::DepartmentNotFound
            | Self::GroupNotFound
            | Self::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::UserExists => StatusCode::CONFLICT,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this is an infrastructure fault rather than a domain outcome.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Internal(_))
    }

    /// Message placed in the response body. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        if self.is_internal() {
            "internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_internal() {
            tracing::error!("Request failed: {}", self);
        }
        let body = Json(serde_json::json!({ "Error": self.public_message() }));
        (status, body).into_response()
    }
}
