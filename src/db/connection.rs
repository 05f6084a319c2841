use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::debug;

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("COURSEGATE_DB_URL")
                .unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("COURSEGATE_DB_NAMESPACE")
                .unwrap_or_else(|_| "coursegate".to_string()),
            database: env::var("COURSEGATE_DB_DATABASE")
                .unwrap_or_else(|_| "platform".to_string()),
            username: env::var("COURSEGATE_DB_USERNAME").ok(),
            password: env::var("COURSEGATE_DB_PASSWORD").ok(),
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

/// Unique index on `user.uid`.
pub const USER_UID_INDEX: &str = "user_uid";
/// Unique index on `user.email`.
pub const USER_EMAIL_INDEX: &str = "user_email";

/// Name of the unique index a rejected write collided with, if any.
pub fn conflicting_index(err: &surrealdb::Error) -> Option<String> {
    if let surrealdb::Error::Db(surrealdb::error::Db::IndexExists { index, .. }) = err {
        return Some(index.clone());
    }

    // Remote engines only hand back the rendered message
    let msg = err.to_string();
    [USER_UID_INDEX, USER_EMAIL_INDEX]
        .into_iter()
        .find(|index| msg.contains(&format!("index `{}`", index)))
        .map(str::to_string)
}

/// Role ids seeded into an empty database: (id, name).
pub const SEED_ROLES: [(i64, &str); 3] = [(1, "student"), (2, "teacher"), (3, "admin")];

pub async fn ensure_schema(db: &Db) -> Result<()> {
    let user_schema = format!(
        "DEFINE TABLE IF NOT EXISTS user SCHEMALESS;
         DEFINE INDEX IF NOT EXISTS {USER_UID_INDEX} ON TABLE user COLUMNS uid UNIQUE;
         DEFINE INDEX IF NOT EXISTS {USER_EMAIL_INDEX} ON TABLE user COLUMNS email UNIQUE;"
    );

    let schema_queries = vec![
        // Catalog tables. Every row carries an integer `uid`.
        "DEFINE TABLE IF NOT EXISTS user_role SCHEMALESS;
         DEFINE INDEX IF NOT EXISTS user_role_uid ON TABLE user_role COLUMNS uid UNIQUE;",

        "DEFINE TABLE IF NOT EXISTS department SCHEMALESS;
         DEFINE INDEX IF NOT EXISTS department_uid ON TABLE department COLUMNS uid UNIQUE;",

        "DEFINE TABLE IF NOT EXISTS study_group SCHEMALESS;
         DEFINE INDEX IF NOT EXISTS study_group_uid ON TABLE study_group COLUMNS uid UNIQUE;",

        user_schema.as_str(),

        // Refresh sessions
        "DEFINE TABLE IF NOT EXISTS auth_session SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS user_id ON TABLE auth_session TYPE int;
         DEFINE FIELD IF NOT EXISTS refresh_token ON TABLE auth_session TYPE string;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE auth_session TYPE int;
         DEFINE FIELD IF NOT EXISTS expires_at ON TABLE auth_session TYPE int;
         DEFINE INDEX IF NOT EXISTS auth_session_refresh_token ON TABLE auth_session COLUMNS refresh_token UNIQUE;
         DEFINE INDEX IF NOT EXISTS auth_session_user_id ON TABLE auth_session COLUMNS user_id;",

        // Courses and their membership relation
        "DEFINE TABLE IF NOT EXISTS course SCHEMALESS;
         DEFINE INDEX IF NOT EXISTS course_uid ON TABLE course COLUMNS uid UNIQUE;
         DEFINE INDEX IF NOT EXISTS course_teacher_id ON TABLE course COLUMNS teacher_id;",

        "DEFINE TABLE IF NOT EXISTS group_course SCHEMALESS;
         DEFINE INDEX IF NOT EXISTS group_course_pair ON TABLE group_course COLUMNS group_id, course_id UNIQUE;",

        // Nested course content
        "DEFINE TABLE IF NOT EXISTS course_info SCHEMALESS;
         DEFINE INDEX IF NOT EXISTS course_info_uid ON TABLE course_info COLUMNS uid UNIQUE;",

        "DEFINE TABLE IF NOT EXISTS course_lab SCHEMALESS;
         DEFINE INDEX IF NOT EXISTS course_lab_uid ON TABLE course_lab COLUMNS uid UNIQUE;",

        "DEFINE TABLE IF NOT EXISTS course_test SCHEMALESS;
         DEFINE INDEX IF NOT EXISTS course_test_uid ON TABLE course_test COLUMNS uid UNIQUE;",
    ];

    for query in schema_queries {
        db.query(query).await?.check()?;
    }

    // Seed the fixed role enumeration if the table is empty
    let existing: Vec<i64> = db
        .query("SELECT VALUE uid FROM user_role LIMIT 1")
        .await?
        .take(0)?;
    if existing.is_empty() {
        for (uid, name) in SEED_ROLES {
            db.query("CREATE user_role CONTENT { uid: $uid, name: $name }")
                .bind(("uid", uid))
                .bind(("name", name.to_string()))
                .await?
                .check()?;
        }
        debug!("Seeded {} roles", SEED_ROLES.len());
    }

    Ok(())
}
