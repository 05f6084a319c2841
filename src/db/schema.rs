use serde::{Deserialize, Serialize};
use surrealdb::RecordId;

use crate::types::{Email, PasswordHash, RefreshToken};

/// Persisted user row, consumed read-only by the authentication core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Integer user id (embedded as `user_id` in access claims)
    pub uid: i64,
    pub role_id: i64,
    pub group_id: i64,
    pub dep_id: i64,
    pub email: Email,
    pub password_hash: PasswordHash,
    pub name: String,
    pub patronymic: String,
    pub surname: String,
}

/// Payload for creating a new user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreate {
    pub email: Email,
    pub password_hash: PasswordHash,
    pub name: String,
    pub patronymic: String,
    pub surname: String,
    pub role_id: i64,
    pub dep_id: i64,
    pub group_id: i64,
}

/// Persisted refresh session.
///
/// One row per signed-in device. The refresh token is unique across rows and
/// `expires_at` (unix seconds) is authoritative even if a stale row lingers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: RecordId,
    pub user_id: i64,
    pub refresh_token: RefreshToken,
    /// Creation time in unix microseconds; orders rows for the cap flush
    pub created_at: i64,
    pub expires_at: i64,
}

impl SessionRecord {
    /// Whether the session is past its expiry at `now` (unix seconds).
    pub fn expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRecord {
    pub uid: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartmentRecord {
    pub uid: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    pub uid: i64,
    pub name: String,
    pub dep_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseRecord {
    pub uid: i64,
    pub name: String,
    pub term: i64,
    pub teacher_id: i64,
    pub dep_id: i64,
}

/// Info page, lab or test nested under a course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedPageRecord {
    pub uid: i64,
    pub course_id: i64,
    pub name: String,
}
