//! Refresh session store.
//!
//! Each row maps an opaque refresh token to its owner and expiry. The table
//! is the single source of truth for whether a refresh token is usable;
//! access tokens are never stored.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::tokens::{TokenCodec, TokenPair};
use crate::auth::user_store::UserStore;
use crate::config::AuthConfig;
use crate::db::Db;
use crate::db::schema::SessionRecord;
use crate::types::RefreshToken;

/// Random bytes behind every refresh token.
pub const REFRESH_TOKEN_BYTES: usize = 32;

/// Generate an unguessable refresh token.
pub fn generate_refresh_token() -> AuthResult<RefreshToken> {
    let mut buf = [0u8; REFRESH_TOKEN_BYTES];
    getrandom::getrandom(&mut buf)
        .map_err(|e| AuthError::Internal(format!("random source unavailable: {}", e)))?;
    Ok(RefreshToken::new(URL_SAFE_NO_PAD.encode(buf)))
}

/// Lifetime and cap applied to new sessions.
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub refresh_lifetime: Duration,
    /// Creating a session beyond this count flushes every older one.
    pub max_sessions_per_user: usize,
}

impl SessionPolicy {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            refresh_lifetime: config.refresh_lifetime(),
            max_sessions_per_user: config.max_sessions_per_user,
        }
    }
}

const SESSION_FIELDS: &str = "id, user_id, refresh_token, created_at, expires_at";

/// Persistent store of refresh sessions.
#[derive(Clone)]
pub struct SessionStore {
    db: Db,
    codec: TokenCodec,
    users: UserStore,
    policy: SessionPolicy,
}

impl SessionStore {
    pub fn new(db: Db, codec: TokenCodec, users: UserStore, policy: SessionPolicy) -> Self {
        Self {
            db,
            codec,
            users,
            policy,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Open a session and mint its token pair.
    ///
    /// When this pushes the user over the cap, every session created before
    /// this one is deleted. Rows are ordered by `(created_at, refresh_token)`
    /// and a flush only ever removes older rows, so racing sign-ins never
    /// delete the newest session.
    pub async fn create(&self, user_id: i64, role_id: i64, group_id: i64) -> AuthResult<TokenPair> {
        let refresh_token = generate_refresh_token()?;
        let access_token = self.codec.mint(user_id, role_id, group_id)?;
        let now = Utc::now();
        let created_at = now.timestamp_micros();
        let expires_at = (now + self.policy.refresh_lifetime).timestamp();

        let query = r#"
            CREATE auth_session CONTENT {
                user_id: $user_id,
                refresh_token: $refresh_token,
                created_at: $created_at,
                expires_at: $expires_at
            } RETURN NONE
        "#;
        self.db
            .query(query)
            .bind(("user_id", user_id))
            .bind(("refresh_token", refresh_token.clone()))
            .bind(("created_at", created_at))
            .bind(("expires_at", expires_at))
            .await?
            .check()?;

        let live = self.count_for_user(user_id).await?;
        if live > self.policy.max_sessions_per_user {
            warn!(
                "User {} exceeded {} sessions, flushing older sessions",
                user_id, self.policy.max_sessions_per_user
            );
            let query = r#"
                DELETE auth_session
                WHERE user_id = $user_id
                    AND (created_at < $created_at
                        OR (created_at = $created_at AND refresh_token < $keep))
            "#;
            self.db
                .query(query)
                .bind(("user_id", user_id))
                .bind(("created_at", created_at))
                .bind(("keep", refresh_token.clone()))
                .await?
                .check()?;
        }

        debug!("Created session for user {}", user_id);
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Find the session owning `refresh_token`.
    pub async fn lookup(&self, refresh_token: &RefreshToken) -> AuthResult<SessionRecord> {
        let query = format!(
            "SELECT {} FROM auth_session WHERE refresh_token = $refresh_token LIMIT 1",
            SESSION_FIELDS
        );
        let sessions: Vec<SessionRecord> = self
            .db
            .query(&query)
            .bind(("refresh_token", refresh_token.clone()))
            .await?
            .take(0)?;

        sessions.into_iter().next().ok_or(AuthError::SessionNotFound)
    }

    /// Report whether the session has expired, deleting it if so.
    pub async fn is_expired(&self, session: &SessionRecord) -> AuthResult<bool> {
        if !session.expired_at(Utc::now().timestamp()) {
            return Ok(false);
        }

        debug!("Session for user {} expired, deleting", session.user_id);
        self.db
            .query("DELETE auth_session WHERE id = $id")
            .bind(("id", session.id.clone()))
            .await?
            .check()?;
        Ok(true)
    }

    /// Swap the session's refresh token and extend its expiry.
    ///
    /// Claims are rebuilt from the current user row. The swap is a single
    /// update guarded on the old token, so the old and new tokens are never
    /// valid at the same time and a concurrent second rotation of the same
    /// token finds nothing to update.
    pub async fn rotate(&self, session: &SessionRecord) -> AuthResult<TokenPair> {
        let user = match self.users.find_by_id(session.user_id).await? {
            Some(user) => user,
            None => {
                self.revoke(&session.refresh_token).await?;
                return Err(AuthError::UserNotFound);
            }
        };

        let refresh_token = generate_refresh_token()?;
        let access_token = self.codec.mint(user.uid, user.role_id, user.group_id)?;
        let expires_at = (Utc::now() + self.policy.refresh_lifetime).timestamp();

        let query = r#"
            UPDATE auth_session
            SET refresh_token = $new_token, expires_at = $expires_at
            WHERE refresh_token = $old_token
            RETURN AFTER
        "#;
        let updated: Vec<SessionRecord> = self
            .db
            .query(query)
            .bind(("new_token", refresh_token.clone()))
            .bind(("expires_at", expires_at))
            .bind(("old_token", session.refresh_token.clone()))
            .await?
            .take(0)?;

        if updated.is_empty() {
            return Err(AuthError::SessionNotFound);
        }

        info!("Rotated session for user {}", user.uid);
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Delete the session for `refresh_token`. Absent tokens are fine.
    pub async fn revoke(&self, refresh_token: &RefreshToken) -> AuthResult<()> {
        self.db
            .query("DELETE auth_session WHERE refresh_token = $refresh_token")
            .bind(("refresh_token", refresh_token.clone()))
            .await?
            .check()?;
        Ok(())
    }

    /// Delete every session of a user; returns how many were removed.
    pub async fn revoke_all(&self, user_id: i64) -> AuthResult<usize> {
        let removed: Vec<SessionRecord> = self
            .db
            .query("DELETE auth_session WHERE user_id = $user_id RETURN BEFORE")
            .bind(("user_id", user_id))
            .await?
            .take(0)?;
        Ok(removed.len())
    }

    pub async fn count_for_user(&self, user_id: i64) -> AuthResult<usize> {
        let tokens: Vec<RefreshToken> = self
            .db
            .query("SELECT VALUE refresh_token FROM auth_session WHERE user_id = $user_id")
            .bind(("user_id", user_id))
            .await?
            .take(0)?;
        Ok(tokens.len())
    }

    /// Delete every expired row; returns how many were removed.
    pub async fn purge_expired(&self) -> AuthResult<usize> {
        let now = Utc::now().timestamp();
        let expired: Vec<SessionRecord> = self
            .db
            .query("DELETE auth_session WHERE expires_at <= $now RETURN BEFORE")
            .bind(("now", now))
            .await?
            .take(0)?;

        if !expired.is_empty() {
            info!("Purged {} expired sessions", expired.len());
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::user_store::hash_password;
    use crate::db::schema::UserCreate;
    use crate::db::{DatabaseConfig, create_connection, ensure_schema};
    use crate::types::Email;

    async fn setup_test_db() -> Db {
        let config = DatabaseConfig {
            url: "memory".to_string(),
            ..Default::default()
        };
        let db = create_connection(config).await.unwrap();
        ensure_schema(&db).await.unwrap();
        db
    }

    fn codec() -> TokenCodec {
        TokenCodec::new(b"session-test-secret", Duration::minutes(15))
    }

    fn store_with(db: Db, refresh_lifetime: Duration) -> SessionStore {
        SessionStore::new(
            db.clone(),
            codec(),
            UserStore::new(db),
            SessionPolicy {
                refresh_lifetime,
                max_sessions_per_user: 5,
            },
        )
    }

    async fn seed_user(db: &Db, uid: i64, role_id: i64, group_id: i64) {
        UserStore::new(db.clone())
            .create_user_with_id(
                uid,
                &UserCreate {
                    email: Email::new(format!("user{}@example.com", uid)),
                    password_hash: hash_password("password1"),
                    name: "Anna".to_string(),
                    patronymic: "Sergeevna".to_string(),
                    surname: "Ivanova".to_string(),
                    role_id,
                    dep_id: 2,
                    group_id,
                },
            )
            .await
            .unwrap();
    }

    #[test]
    fn test_refresh_token_shape() {
        let a = generate_refresh_token().unwrap();
        let b = generate_refresh_token().unwrap();

        assert_ne!(a, b);
        // 32 bytes, base64url without padding
        assert_eq!(a.as_str().len(), 43);
        assert_eq!(URL_SAFE_NO_PAD.decode(a.as_str()).unwrap().len(), REFRESH_TOKEN_BYTES);
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let db = setup_test_db().await;
        let store = store_with(db, Duration::days(30));

        let pair = store.create(1, 1, 5).await.unwrap();
        let session = store.lookup(&pair.refresh_token).await.unwrap();

        assert_eq!(session.user_id, 1);
        assert_eq!(session.refresh_token, pair.refresh_token);
        assert!(session.expires_at > Utc::now().timestamp());
        assert!(!store.is_expired(&session).await.unwrap());

        let claims = codec().verify(&pair.access_token).unwrap();
        assert_eq!((claims.user_id, claims.role_id, claims.group_id), (1, 1, 5));
    }

    #[tokio::test]
    async fn test_lookup_unknown_token() {
        let db = setup_test_db().await;
        let store = store_with(db, Duration::days(30));

        let err = store.lookup(&RefreshToken::new("missing")).await.unwrap_err();
        assert_eq!(err, AuthError::SessionNotFound);
    }

    #[tokio::test]
    async fn test_sixth_session_flushes_the_rest() {
        let db = setup_test_db().await;
        let store = store_with(db, Duration::days(30));

        let mut pairs = Vec::new();
        for _ in 0..5 {
            pairs.push(store.create(1, 1, 5).await.unwrap());
        }
        assert_eq!(store.count_for_user(1).await.unwrap(), 5);

        let newest = store.create(1, 1, 5).await.unwrap();
        assert_eq!(store.count_for_user(1).await.unwrap(), 1);
        assert!(store.lookup(&newest.refresh_token).await.is_ok());
        for pair in &pairs {
            assert_eq!(
                store.lookup(&pair.refresh_token).await.unwrap_err(),
                AuthError::SessionNotFound
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_creates_keep_a_session() {
        for _ in 0..20 {
            let db = setup_test_db().await;
            let store = store_with(db, Duration::days(30));
            for _ in 0..5 {
                store.create(1, 1, 5).await.unwrap();
            }

            let (a, b) = tokio::join!(
                tokio::spawn({
                    let store = store.clone();
                    async move { store.create(1, 1, 5).await }
                }),
                tokio::spawn({
                    let store = store.clone();
                    async move { store.create(1, 1, 5).await }
                }),
            );
            let a = a.unwrap().unwrap();
            let b = b.unwrap().unwrap();

            let live = store.count_for_user(1).await.unwrap();
            assert!((1..=2).contains(&live), "{} sessions left", live);

            let a_live = store.lookup(&a.refresh_token).await.is_ok();
            let b_live = store.lookup(&b.refresh_token).await.is_ok();
            assert!(a_live || b_live);
            assert_eq!(live, usize::from(a_live) + usize::from(b_live));
        }
    }

    #[tokio::test]
    async fn test_cap_is_per_user() {
        let db = setup_test_db().await;
        let store = store_with(db, Duration::days(30));

        for _ in 0..3 {
            store.create(2, 1, 5).await.unwrap();
        }
        for _ in 0..6 {
            store.create(1, 1, 5).await.unwrap();
        }

        assert_eq!(store.count_for_user(1).await.unwrap(), 1);
        assert_eq!(store.count_for_user(2).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_rotate_invalidates_old_token() {
        let db = setup_test_db().await;
        seed_user(&db, 1, 1, 5).await;
        let store = store_with(db, Duration::days(30));

        let pair = store.create(1, 1, 5).await.unwrap();
        let session = store.lookup(&pair.refresh_token).await.unwrap();
        let rotated = store.rotate(&session).await.unwrap();

        assert_ne!(rotated.refresh_token, pair.refresh_token);
        assert_eq!(
            store.lookup(&pair.refresh_token).await.unwrap_err(),
            AuthError::SessionNotFound
        );
        let renewed = store.lookup(&rotated.refresh_token).await.unwrap();
        assert_eq!(renewed.id, session.id);
        assert_eq!(store.count_for_user(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rotate_twice_with_same_session_fails() {
        let db = setup_test_db().await;
        seed_user(&db, 1, 1, 5).await;
        let store = store_with(db, Duration::days(30));

        let pair = store.create(1, 1, 5).await.unwrap();
        let session = store.lookup(&pair.refresh_token).await.unwrap();
        store.rotate(&session).await.unwrap();

        assert_eq!(store.rotate(&session).await.unwrap_err(), AuthError::SessionNotFound);
    }

    #[tokio::test]
    async fn test_rotate_refreshes_stale_claims() {
        let db = setup_test_db().await;
        seed_user(&db, 1, 1, 5).await;
        let store = store_with(db.clone(), Duration::days(30));

        let pair = store.create(1, 1, 5).await.unwrap();
        db.query("UPDATE user SET role_id = 2, group_id = 9 WHERE uid = 1")
            .await
            .unwrap()
            .check()
            .unwrap();

        let session = store.lookup(&pair.refresh_token).await.unwrap();
        let rotated = store.rotate(&session).await.unwrap();
        let claims = codec().verify(&rotated.access_token).unwrap();

        assert_eq!(claims.role_id, 2);
        assert_eq!(claims.group_id, 9);
    }

    #[tokio::test]
    async fn test_rotate_for_deleted_user() {
        let db = setup_test_db().await;
        let store = store_with(db, Duration::days(30));

        let pair = store.create(99, 1, 5).await.unwrap();
        let session = store.lookup(&pair.refresh_token).await.unwrap();

        assert_eq!(store.rotate(&session).await.unwrap_err(), AuthError::UserNotFound);
        assert_eq!(store.count_for_user(99).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_session_is_deleted_on_check() {
        let db = setup_test_db().await;
        let store = store_with(db, Duration::seconds(-60));

        let pair = store.create(1, 1, 5).await.unwrap();
        let session = store.lookup(&pair.refresh_token).await.unwrap();

        assert!(store.is_expired(&session).await.unwrap());
        assert_eq!(
            store.lookup(&pair.refresh_token).await.unwrap_err(),
            AuthError::SessionNotFound
        );
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let db = setup_test_db().await;
        let store = store_with(db, Duration::days(30));

        let pair = store.create(1, 1, 5).await.unwrap();
        store.revoke(&pair.refresh_token).await.unwrap();
        store.revoke(&pair.refresh_token).await.unwrap();
        store.revoke(&RefreshToken::new("never-issued")).await.unwrap();

        assert_eq!(
            store.lookup(&pair.refresh_token).await.unwrap_err(),
            AuthError::SessionNotFound
        );
    }

    #[tokio::test]
    async fn test_revoke_all() {
        let db = setup_test_db().await;
        let store = store_with(db, Duration::days(30));

        for _ in 0..3 {
            store.create(1, 1, 5).await.unwrap();
        }
        let other = store.create(2, 1, 5).await.unwrap();

        assert_eq!(store.revoke_all(1).await.unwrap(), 3);
        assert_eq!(store.count_for_user(1).await.unwrap(), 0);
        assert!(store.lookup(&other.refresh_token).await.is_ok());
        assert_eq!(store.revoke_all(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let db = setup_test_db().await;
        let expired = store_with(db.clone(), Duration::seconds(-60));
        let live = store_with(db, Duration::days(30));

        expired.create(1, 1, 5).await.unwrap();
        expired.create(2, 1, 5).await.unwrap();
        let kept = live.create(3, 1, 5).await.unwrap();

        assert_eq!(live.purge_expired().await.unwrap(), 2);
        assert_eq!(live.purge_expired().await.unwrap(), 0);
        assert!(live.lookup(&kept.refresh_token).await.is_ok());
    }
}
