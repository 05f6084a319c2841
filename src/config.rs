use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default access token lifetime in minutes.
pub const DEFAULT_ACCESS_TOKEN_MINUTES: i64 = 15;
/// Default refresh token lifetime in days.
pub const DEFAULT_REFRESH_TOKEN_DAYS: i64 = 30;
/// Live sessions a user may hold before all of them are flushed.
pub const DEFAULT_MAX_SESSIONS_PER_USER: usize = 5;
/// Department reserved for administrators.
pub const DEFAULT_ADMIN_DEPARTMENT_ID: i64 = 1;

/// Authentication policy loaded once at startup.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for access tokens. Never logged.
    pub jwt_secret: String,
    #[serde(default = "default_access_token_minutes")]
    pub access_token_minutes: i64,
    #[serde(default = "default_refresh_token_days")]
    pub refresh_token_days: i64,
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: usize,
    /// Adds `Secure` to the refresh cookie (serve over TLS only).
    #[serde(default)]
    pub secure_cookies: bool,
    /// Sign-up into this department is refused.
    #[serde(default = "default_admin_department_id")]
    pub admin_department_id: i64,
}

fn default_access_token_minutes() -> i64 {
    DEFAULT_ACCESS_TOKEN_MINUTES
}

fn default_refresh_token_days() -> i64 {
    DEFAULT_REFRESH_TOKEN_DAYS
}

fn default_max_sessions_per_user() -> usize {
    DEFAULT_MAX_SESSIONS_PER_USER
}

fn default_admin_department_id() -> i64 {
    DEFAULT_ADMIN_DEPARTMENT_ID
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_token_minutes: DEFAULT_ACCESS_TOKEN_MINUTES,
            refresh_token_days: DEFAULT_REFRESH_TOKEN_DAYS,
            max_sessions_per_user: DEFAULT_MAX_SESSIONS_PER_USER,
            secure_cookies: false,
            admin_department_id: DEFAULT_ADMIN_DEPARTMENT_ID,
        }
    }
}

impl AuthConfig {
    /// Create a config with the given secret and default policy.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: secret.into(),
            ..Default::default()
        }
    }

    pub fn access_lifetime(&self) -> Duration {
        Duration::minutes(self.access_token_minutes)
    }

    pub fn refresh_lifetime(&self) -> Duration {
        Duration::days(self.refresh_token_days)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jwt_secret.is_empty() {
            anyhow::bail!("JWT secret must be set (COURSEGATE_JWT_SECRET)");
        }
        if self.access_token_minutes <= 0 {
            anyhow::bail!("access token lifetime must be positive");
        }
        if self.refresh_token_days <= 0 {
            anyhow::bail!("refresh token lifetime must be positive");
        }
        if self.max_sessions_per_user == 0 {
            anyhow::bail!("session cap must be at least 1");
        }
        Ok(())
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("access_token_minutes", &self.access_token_minutes)
            .field("refresh_token_days", &self.refresh_token_days)
            .field("max_sessions_per_user", &self.max_sessions_per_user)
            .field("secure_cookies", &self.secure_cookies)
            .field("admin_department_id", &self.admin_department_id)
            .finish()
    }
}
