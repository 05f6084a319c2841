//! Sign-in, sign-up, refresh and logout.
//!
//! `AuthService` is stateless glue over the token codec, the session store
//! and the user store. Transport concerns (cookies, status codes) stay in
//! the HTTP layer.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::access::Role;
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::sessions::{SessionPolicy, SessionStore};
use crate::auth::tokens::{AccessClaims, TokenCodec, TokenPair};
use crate::auth::user_store::{UserStore, hash_password};
use crate::config::AuthConfig;
use crate::db::schema::{UserCreate, UserRecord};
use crate::db::{Db, QueryBuilder};
use crate::types::{Email, RefreshToken};

pub const EMAIL_LEN: RangeInclusive<usize> = 4..=64;
pub const PASSWORD_LEN: RangeInclusive<usize> = 8..=50;
pub const NAME_PART_LEN: RangeInclusive<usize> = 2..=30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// Sign-up body. `role_id` is accepted but never honoured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub patronymic: String,
    pub surname: String,
    pub dep_id: i64,
    pub group_id: i64,
    #[serde(default)]
    pub role_id: Option<i64>,
}

fn check_len(field: &str, value: &str, bounds: &RangeInclusive<usize>) -> AuthResult<()> {
    if bounds.contains(&value.chars().count()) {
        Ok(())
    } else {
        Err(AuthError::InvalidInput(format!(
            "{} must contain at least {} and no more than {} symbols",
            field,
            bounds.start(),
            bounds.end()
        )))
    }
}

impl SignInRequest {
    pub fn validate(&self) -> AuthResult<()> {
        if !EMAIL_LEN.contains(&self.email.chars().count()) {
            return Err(AuthError::InvalidInput("email not valid".to_string()));
        }
        check_len("password", &self.password, &PASSWORD_LEN)
    }
}

impl SignUpRequest {
    /// Shape checks only; referenced ids are checked against storage later.
    pub fn validate(&self) -> AuthResult<()> {
        if !EMAIL_LEN.contains(&self.email.chars().count()) {
            return Err(AuthError::InvalidInput("email not valid".to_string()));
        }
        check_len("password", &self.password, &PASSWORD_LEN)?;
        check_len("name", &self.name, &NAME_PART_LEN)?;
        check_len("patronymic", &self.patronymic, &NAME_PART_LEN)?;
        check_len("surname", &self.surname, &NAME_PART_LEN)
    }
}

/// Authentication flow over shared storage.
#[derive(Clone)]
pub struct AuthService {
    db: Db,
    config: AuthConfig,
    codec: TokenCodec,
    users: UserStore,
    sessions: SessionStore,
}

impl AuthService {
    pub fn new(db: Db, config: AuthConfig) -> Self {
        let codec = TokenCodec::from_config(&config);
        let users = UserStore::new(db.clone());
        let sessions = SessionStore::new(
            db.clone(),
            codec.clone(),
            users.clone(),
            SessionPolicy::from_config(&config),
        );
        Self {
            db,
            config,
            codec,
            users,
            sessions,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Verify a bearer access token.
    pub fn authenticate(&self, access_token: &str) -> AuthResult<AccessClaims> {
        self.codec.verify(access_token)
    }

    /// Check credentials and open a session.
    pub async fn sign_in(&self, req: &SignInRequest) -> AuthResult<TokenPair> {
        req.validate()?;

        let email = Email::new(req.email.as_str());
        let user = self
            .users
            .find_by_credentials(&email, &hash_password(&req.password))
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let pair = self
            .sessions
            .create(user.uid, user.role_id, user.group_id)
            .await?;
        info!("User {} signed in", user.uid);
        Ok(pair)
    }

    /// Register a student account.
    ///
    /// The role is always the least-privileged one, whatever the body says.
    pub async fn sign_up(&self, req: &SignUpRequest) -> AuthResult<UserRecord> {
        req.validate()?;

        let role_id = Role::Student.id();
        if let Some(requested) = req.role_id
            && requested != role_id
        {
            warn!("Sign-up for {} requested role {}, forcing {}", req.email, requested, role_id);
        }

        if !QueryBuilder::role_exists(&self.db, role_id).await? {
            return Err(AuthError::RoleNotFound);
        }
        if !QueryBuilder::department_exists(&self.db, req.dep_id).await? {
            return Err(AuthError::DepartmentNotFound);
        }
        if req.dep_id == self.config.admin_department_id {
            warn!("Rejected sign-up of {} into the admin department", req.email);
            return Err(AuthError::DepartmentRestricted);
        }
        if !QueryBuilder::group_exists(&self.db, req.group_id).await? {
            return Err(AuthError::GroupNotFound);
        }

        let email = Email::new(req.email.as_str());
        if self.users.email_taken(&email).await? {
            return Err(AuthError::UserExists);
        }

        let user = self
            .users
            .create_user(&UserCreate {
                email,
                password_hash: hash_password(&req.password),
                name: req.name.clone(),
                patronymic: req.patronymic.clone(),
                surname: req.surname.clone(),
                role_id,
                dep_id: req.dep_id,
                group_id: req.group_id,
            })
            .await?;

        info!("Registered user {}", user.uid);
        Ok(user)
    }

    /// Exchange a refresh token for a fresh pair.
    pub async fn refresh(&self, refresh_token: &RefreshToken) -> AuthResult<TokenPair> {
        let session = self.sessions.lookup(refresh_token).await?;
        if self.sessions.is_expired(&session).await? {
            debug!("Refresh with expired session for user {}", session.user_id);
            return Err(AuthError::TokenExpired);
        }
        self.sessions.rotate(&session).await
    }

    /// End the session behind `refresh_token`. Unknown tokens are ignored.
    pub async fn logout(&self, refresh_token: &RefreshToken) -> AuthResult<()> {
        self.sessions.revoke(refresh_token).await
    }

    /// Revoke every session of `user_id`. Admin only.
    pub async fn force_logout(&self, caller: &AccessClaims, user_id: i64) -> AuthResult<usize> {
        if Role::from_id(caller.role_id) != Some(Role::Admin) {
            return Err(AuthError::AccessDenied);
        }
        let removed = self.sessions.revoke_all(user_id).await?;
        info!(
            "Admin {} revoked {} sessions of user {}",
            caller.user_id, removed, user_id
        );
        Ok(removed)
    }
}
