// Catalog queries for SurrealDB.
//
// The authentication core only reads the catalog (roles, departments, groups,
// courses and their nested pages). The insert helpers exist for fixtures and
// administrative seeding; general CRUD over these tables lives elsewhere.

use crate::db::schema::*;
use anyhow::Result;
use serde::Serialize;
use surrealdb::{engine::any::Any, Surreal};

pub const ROLE_TABLE: &str = "user_role";
pub const DEPARTMENT_TABLE: &str = "department";
pub const GROUP_TABLE: &str = "study_group";
pub const COURSE_TABLE: &str = "course";

pub struct QueryBuilder;

impl QueryBuilder {
    async fn uid_exists(db: &Surreal<Any>, table: &'static str, uid: i64) -> Result<bool> {
        let query = format!("SELECT VALUE uid FROM {} WHERE uid = $uid LIMIT 1", table);
        let found: Vec<i64> = db.query(&query).bind(("uid", uid)).await?.take(0)?;
        Ok(!found.is_empty())
    }

    async fn insert<T>(db: &Surreal<Any>, table: &'static str, data: &T) -> Result<()>
    where
        T: Serialize + Clone + 'static,
    {
        let query = format!("CREATE {} CONTENT $data", table);
        db.query(&query)
            .bind(("data", data.clone()))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn role_exists(db: &Surreal<Any>, role_id: i64) -> Result<bool> {
        Self::uid_exists(db, ROLE_TABLE, role_id).await
    }

    pub async fn department_exists(db: &Surreal<Any>, dep_id: i64) -> Result<bool> {
        Self::uid_exists(db, DEPARTMENT_TABLE, dep_id).await
    }

    pub async fn group_exists(db: &Surreal<Any>, group_id: i64) -> Result<bool> {
        Self::uid_exists(db, GROUP_TABLE, group_id).await
    }

    pub async fn create_role(db: &Surreal<Any>, role: &RoleRecord) -> Result<()> {
        Self::insert(db, ROLE_TABLE, role).await
    }

    pub async fn create_department(db: &Surreal<Any>, dep: &DepartmentRecord) -> Result<()> {
        Self::insert(db, DEPARTMENT_TABLE, dep).await
    }

    pub async fn create_group(db: &Surreal<Any>, group: &GroupRecord) -> Result<()> {
        Self::insert(db, GROUP_TABLE, group).await
    }

    pub async fn create_course(db: &Surreal<Any>, course: &CourseRecord) -> Result<()> {
        Self::insert(db, COURSE_TABLE, course).await
    }

    /// Insert an info page, lab or test into its table.
    pub async fn create_nested_page(
        db: &Surreal<Any>,
        table: &'static str,
        page: &NestedPageRecord,
    ) -> Result<()> {
        Self::insert(db, table, page).await
    }

    /// Grant a group read access to a course.
    pub async fn link_group_course(
        db: &Surreal<Any>,
        group_id: i64,
        course_id: i64,
    ) -> Result<()> {
        db.query("CREATE group_course CONTENT { group_id: $group_id, course_id: $course_id }")
            .bind(("group_id", group_id))
            .bind(("course_id", course_id))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn find_course(db: &Surreal<Any>, course_id: i64) -> Result<Option<CourseRecord>> {
        let mut res = db
            .query(
                r#"
                SELECT uid, name, term, teacher_id, dep_id FROM course
                WHERE uid = $uid
                LIMIT 1
                "#,
            )
            .bind(("uid", course_id))
            .await?;

        let courses: Vec<CourseRecord> = res.take(0)?;
        Ok(courses.into_iter().next())
    }

    /// Whether `group_id` is linked to `course_id`.
    pub async fn group_has_course(
        db: &Surreal<Any>,
        group_id: i64,
        course_id: i64,
    ) -> Result<bool> {
        let mut res = db
            .query(
                r#"
                SELECT VALUE course_id FROM group_course
                WHERE group_id = $group_id AND course_id = $course_id
                LIMIT 1
                "#,
            )
            .bind(("group_id", group_id))
            .bind(("course_id", course_id))
            .await?;

        let found: Vec<i64> = res.take(0)?;
        Ok(!found.is_empty())
    }

    /// Owning course of a nested page, if the page exists.
    pub async fn nested_page_course(
        db: &Surreal<Any>,
        table: &'static str,
        page_id: i64,
    ) -> Result<Option<i64>> {
        let query = format!(
            "SELECT VALUE course_id FROM {} WHERE uid = $uid LIMIT 1",
            table
        );
        let found: Vec<i64> = db.query(&query).bind(("uid", page_id)).await?.take(0)?;
        Ok(found.into_iter().next())
    }
}
