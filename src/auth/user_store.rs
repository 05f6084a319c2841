//! User storage.
//!
//! The authentication core only reads users (by credentials or by id) and
//! inserts new ones on sign-up. Everything else about users belongs to the
//! resource handlers.

use anyhow::Result;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::auth::error::{AuthError, AuthResult};
use crate::db::{Db, USER_EMAIL_INDEX, USER_UID_INDEX, conflicting_index};
use crate::db::schema::{UserCreate, UserRecord};
use crate::types::{Email, PasswordHash};

/// Attempts at allocating a fresh uid before giving up.
const UID_ALLOCATION_ATTEMPTS: usize = 5;

/// Hash a plain-text password for storage or comparison.
pub fn hash_password(password: &str) -> PasswordHash {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    let result = hasher.finalize();
    PasswordHash::new(format!("{:x}", result))
}

#[derive(Deserialize)]
struct UidRow {
    uid: i64,
}

/// User store for database operations.
#[derive(Clone)]
pub struct UserStore {
    db: Db,
}

impl UserStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Find the user whose email and password digest both match.
    pub async fn find_by_credentials(
        &self,
        email: &Email,
        password_hash: &PasswordHash,
    ) -> Result<Option<UserRecord>> {
        let query = r#"
            SELECT uid, role_id, group_id, dep_id, email, password_hash, name, patronymic, surname
            FROM user
            WHERE email = $email AND password_hash = $password_hash
            LIMIT 1
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("email", email.clone()))
            .bind(("password_hash", password_hash.clone()))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users.into_iter().next())
    }

    /// Get a user by integer id.
    pub async fn find_by_id(&self, user_id: i64) -> Result<Option<UserRecord>> {
        let query = r#"
            SELECT uid, role_id, group_id, dep_id, email, password_hash, name, patronymic, surname
            FROM user
            WHERE uid = $uid
            LIMIT 1
        "#;

        let mut res = self.db.query(query).bind(("uid", user_id)).await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users.into_iter().next())
    }

    /// Whether an account already uses this email.
    pub async fn email_taken(&self, email: &Email) -> Result<bool> {
        let found: Vec<i64> = self
            .db
            .query("SELECT VALUE uid FROM user WHERE email = $email LIMIT 1")
            .bind(("email", email.clone()))
            .await?
            .take(0)?;
        Ok(!found.is_empty())
    }

    async fn next_uid(&self) -> Result<i64> {
        let rows: Vec<UidRow> = self
            .db
            .query("SELECT uid FROM user ORDER BY uid DESC LIMIT 1")
            .await?
            .take(0)?;
        Ok(rows.first().map(|row| row.uid + 1).unwrap_or(1))
    }

    /// Insert a user under the next free uid.
    ///
    /// Two concurrent sign-ups can compute the same uid; the unique index
    /// rejects the loser, which then retries with a fresh one.
    pub async fn create_user(&self, create: &UserCreate) -> AuthResult<UserRecord> {
        for _ in 0..UID_ALLOCATION_ATTEMPTS {
            let uid = self.next_uid().await?;
            let record = Self::record(uid, create);
            match self.insert(&record).await {
                Ok(()) => return Ok(record),
                Err(e) if conflicting_index(&e).as_deref() == Some(USER_UID_INDEX) => {
                    debug!("uid {} taken concurrently, retrying", uid);
                }
                Err(e) => return Err(Self::classify(e)),
            }
        }
        warn!("Gave up allocating a user id after {} attempts", UID_ALLOCATION_ATTEMPTS);
        Err(AuthError::Database("could not allocate user id".to_string()))
    }

    /// Insert a user under a caller-chosen uid.
    pub async fn create_user_with_id(
        &self,
        uid: i64,
        create: &UserCreate,
    ) -> AuthResult<UserRecord> {
        let record = Self::record(uid, create);
        self.insert(&record).await.map_err(Self::classify)?;
        Ok(record)
    }

    fn record(uid: i64, create: &UserCreate) -> UserRecord {
        UserRecord {
            uid,
            role_id: create.role_id,
            group_id: create.group_id,
            dep_id: create.dep_id,
            email: create.email.clone(),
            password_hash: create.password_hash.clone(),
            name: create.name.clone(),
            patronymic: create.patronymic.clone(),
            surname: create.surname.clone(),
        }
    }

    async fn insert(&self, record: &UserRecord) -> surrealdb::Result<()> {
        self.db
            .query("CREATE user CONTENT $data RETURN NONE")
            .bind(("data", record.clone()))
            .await?
            .check()?;
        Ok(())
    }

    fn classify(err: surrealdb::Error) -> AuthError {
        if conflicting_index(&err).as_deref() == Some(USER_EMAIL_INDEX) {
            AuthError::UserExists
        } else {
            AuthError::from(err)
        }
    }
}
