//! Claims-based authorization.
//!
//! Two gates sit in front of resource handlers: a role gate for writing
//! course-like resources, and an ownership/membership gate that grades a
//! caller's access to one specific course or anything nested under it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::tokens::AccessClaims;
use crate::db::schema::CourseRecord;
use crate::db::{Db, QueryBuilder};

/// Fixed role enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn id(self) -> i64 {
        match self {
            Self::Student => 1,
            Self::Teacher => 2,
            Self::Admin => 3,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Self::Student),
            2 => Some(Self::Teacher),
            3 => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Role gate for creating or editing courses and their content.
pub fn can_write_courses(claims: &AccessClaims) -> bool {
    matches!(
        Role::from_id(claims.role_id),
        Some(Role::Teacher) | Some(Role::Admin)
    )
}

/// Like [`can_write_courses`], as a result.
pub fn require_course_writer(claims: &AccessClaims) -> AuthResult<()> {
    if can_write_courses(claims) {
        Ok(())
    } else {
        Err(AuthError::AccessDenied)
    }
}

/// Degree of access to a course. Serialized as 0, 1 or 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessLevel {
    None = 0,
    Read = 1,
    Write = 2,
}

impl AccessLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl Serialize for AccessLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for AccessLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Self::None),
            1 => Ok(Self::Read),
            2 => Ok(Self::Write),
            other => Err(serde::de::Error::custom(format!(
                "invalid access level: {}",
                other
            ))),
        }
    }
}

/// Kinds of resource that resolve to a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Course,
    Info,
    Lab,
    Test,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Course => "course",
            Self::Info => "info",
            Self::Lab => "lab",
            Self::Test => "test",
        }
    }

    /// Storage table holding this kind.
    pub fn table(self) -> &'static str {
        match self {
            Self::Course => "course",
            Self::Info => "course_info",
            Self::Lab => "course_lab",
            Self::Test => "course_test",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "course" | "courses" => Ok(Self::Course),
            "info" => Ok(Self::Info),
            "lab" | "labs" => Ok(Self::Lab),
            "test" | "tests" => Ok(Self::Test),
            other => Err(AuthError::InvalidInput(format!(
                "unknown resource kind: {}",
                other
            ))),
        }
    }
}

/// A specific resource addressed by kind and id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: i64,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn course(id: i64) -> Self {
        Self::new(ResourceKind::Course, id)
    }
}

/// Grades access to a course-backed resource.
#[derive(Clone)]
pub struct AccessChecker {
    db: Db,
}

impl AccessChecker {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Course owning `resource`.
    pub async fn resolve_course(&self, resource: ResourceRef) -> AuthResult<CourseRecord> {
        let course_id = match resource.kind {
            ResourceKind::Course => resource.id,
            kind => QueryBuilder::nested_page_course(&self.db, kind.table(), resource.id)
                .await?
                .ok_or_else(|| AuthError::ResourceNotFound(kind.to_string()))?,
        };

        QueryBuilder::find_course(&self.db, course_id)
            .await?
            .ok_or_else(|| AuthError::ResourceNotFound(ResourceKind::Course.to_string()))
    }

    /// Owner teacher gets write, a member group gets read, anyone else none.
    pub async fn access_level(
        &self,
        claims: &AccessClaims,
        resource: ResourceRef,
    ) -> AuthResult<AccessLevel> {
        let course = self.resolve_course(resource).await?;

        let level = if course.teacher_id == claims.user_id {
            AccessLevel::Write
        } else if QueryBuilder::group_has_course(&self.db, claims.group_id, course.uid).await? {
            AccessLevel::Read
        } else {
            AccessLevel::None
        };

        debug!(
            "User {} has {:?} access to {} {} (course {})",
            claims.user_id, level, resource.kind, resource.id, course.uid
        );
        Ok(level)
    }

    /// Fail with `AccessDenied` unless the caller has at least `needed`.
    pub async fn require(
        &self,
        claims: &AccessClaims,
        resource: ResourceRef,
        needed: AccessLevel,
    ) -> AuthResult<AccessLevel> {
        let level = self.access_level(claims, resource).await?;
        if level >= needed {
            Ok(level)
        } else {
            Err(AuthError::AccessDenied)
        }
    }
}
