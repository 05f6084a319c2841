//! Session and token authentication.
//!
//! Credentials are exchanged for a token pair:
//!
//! - **Access token**: short-lived HS256 JWT carrying `{user_id, role_id, group_id, exp}`.
//!   Verified statelessly on every request.
//! - **Refresh token**: 32 random bytes, stored server-side in `auth_session`.
//!   Rotated in place on every refresh; delivered as an HttpOnly cookie.
//!
//! ## Session lifecycle
//!
//! - A user holds at most `max_sessions_per_user` sessions; opening one more
//!   deletes all the others
//! - Expired sessions are deleted when next presented, or by `purge-sessions`
//! - Logout deletes the session and is idempotent
//!
//! ## Usage
//!
//! ```ignore
//! let service = AuthService::new(db, config);
//! let pair = service.sign_in(&SignInRequest { email, password }).await?;
//! let claims = service.authenticate(&pair.access_token)?;
//! let pair = service.refresh(&pair.refresh_token).await?;
//! ```

pub mod error;
pub mod extractor;
pub mod flow;
pub mod sessions;
pub mod tokens;
pub mod user_store;

pub use error::{AuthError, AuthResult};
pub use extractor::{REFRESH_COOKIE, bearer_token, clear_refresh_cookie, refresh_cookie, refresh_token};
pub use flow::{AuthService, SignInRequest, SignUpRequest};
pub use sessions::{SessionPolicy, SessionStore, generate_refresh_token};
pub use tokens::{AccessClaims, TokenCodec, TokenPair};
pub use user_store::{UserStore, hash_password};
