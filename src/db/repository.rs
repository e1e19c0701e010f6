use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::types::Json;

use crate::error::AppError;
use crate::models::course::CourseRow;
use crate::models::{Course, CourseAssignment, CourseView};

const COURSE_COLUMNS: &str = "id, title, slug, owner_id, subject, year_of_study, is_active, \
    links, attachment_urls, version, created_at, updated_at";

pub async fn find_course(db: &SqlitePool, id: &str) -> Result<Option<Course>, AppError> {
    let row = sqlx::query_as::<_, CourseRow>(&format!(
        "SELECT {} FROM courses WHERE id = ?",
        COURSE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(db)
    .await?;

    Ok(row.map(Course::from))
}

pub async fn find_course_by_slug(db: &SqlitePool, slug: &str) -> Result<Option<Course>, AppError> {
    let row = sqlx::query_as::<_, CourseRow>(&format!(
        "SELECT {} FROM courses WHERE slug = ?",
        COURSE_COLUMNS
    ))
    .bind(slug)
    .fetch_optional(db)
    .await?;

    Ok(row.map(Course::from))
}

pub async fn fetch_courses(db: &SqlitePool) -> Result<Vec<Course>, AppError> {
    let rows = sqlx::query_as::<_, CourseRow>(&format!(
        "SELECT {} FROM courses ORDER BY created_at DESC",
        COURSE_COLUMNS
    ))
    .fetch_all(db)
    .await?;

    Ok(rows.into_iter().map(Course::from).collect())
}

pub async fn insert_course(db: &SqlitePool, course: &Course) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO courses
            (id, title, slug, owner_id, subject, year_of_study, is_active,
            links, attachment_urls, version, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(&course.id)
    .bind(&course.title)
    .bind(&course.slug)
    .bind(&course.owner_id)
    .bind(&course.subject)
    .bind(course.year_of_study)
    .bind(course.is_active)
    .bind(Json(&course.links))
    .bind(Json(&course.attachment_urls))
    .bind(course.version)
    .bind(course.created_at)
    .bind(course.updated_at)
    .execute(db)
    .await?;

    Ok(())
}

/// Overwrites the row only if its version still equals `expected_version`.
/// Returns `false` when another writer got there first.
pub async fn update_course_cas(
    db: &SqlitePool,
    course: &Course,
    expected_version: i64,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE courses
        SET title = ?1,
            slug = ?2,
            owner_id = ?3,
            subject = ?4,
            year_of_study = ?5,
            is_active = ?6,
            links = ?7,
            attachment_urls = ?8,
            updated_at = ?9,
            version = version + 1
        WHERE id = ?10 AND version = ?11
        "#,
    )
    .bind(&course.title)
    .bind(&course.slug)
    .bind(&course.owner_id)
    .bind(&course.subject)
    .bind(course.year_of_study)
    .bind(course.is_active)
    .bind(Json(&course.links))
    .bind(Json(&course.attachment_urls))
    .bind(course.updated_at)
    .bind(&course.id)
    .bind(expected_version)
    .execute(db)
    .await?
    .rows_affected();

    Ok(result == 1)
}

/// Removes the course row, its cascaded membership and every slug claim it
/// holds, in one transaction.
pub async fn delete_course(db: &SqlitePool, id: &str) -> Result<bool, AppError> {
    let mut tx = db.begin().await?;

    let deleted = sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    sqlx::query("DELETE FROM slug_reservations WHERE course_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(deleted > 0)
}

pub async fn load_course_view(db: &SqlitePool, id: &str) -> Result<Option<CourseView>, AppError> {
    let Some(course) = find_course(db, id).await? else {
        return Ok(None);
    };
    let assigned_users = active_assignees(db, id).await?;
    let assigned_classes = linked_classes(db, id).await?;

    Ok(Some(CourseView {
        course,
        assigned_users,
        assigned_classes,
    }))
}

pub async fn active_assignees(db: &SqlitePool, course_id: &str) -> Result<BTreeSet<String>, AppError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT student_id FROM course_assignments WHERE course_id = ? AND is_active = 1",
    )
    .bind(course_id)
    .fetch_all(db)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn fetch_assignments(db: &SqlitePool, course_id: &str) -> Result<Vec<CourseAssignment>, AppError> {
    let rows = sqlx::query_as::<_, CourseAssignment>(
        r#"
        SELECT course_id, student_id, assigned_by, assigned_at, is_active
        FROM course_assignments
        WHERE course_id = ?
        ORDER BY student_id
        "#,
    )
    .bind(course_id)
    .fetch_all(db)
    .await?;

    Ok(rows)
}

/// Inserts or re-activates an assignment per student. Returns how many
/// students were not actively assigned before the call.
pub async fn activate_assignments(
    db: &SqlitePool,
    course_id: &str,
    student_ids: &BTreeSet<String>,
    assigned_by: &str,
) -> Result<usize, AppError> {
    let now = Utc::now();
    let mut changed = 0;

    for student_id in student_ids {
        let affected = sqlx::query(
            r#"
            INSERT INTO course_assignments (course_id, student_id, assigned_by, assigned_at, is_active)
            VALUES (?1, ?2, ?3, ?4, 1)
            ON CONFLICT(course_id, student_id) DO UPDATE SET is_active = 1
            WHERE course_assignments.is_active = 0
            "#,
        )
        .bind(course_id)
        .bind(student_id)
        .bind(assigned_by)
        .bind(now)
        .execute(db)
        .await?
        .rows_affected();
        changed += affected as usize;
    }

    Ok(changed)
}

/// Inserts assignments for students that have no row at all. An inactive row
/// is an explicit removal and is left alone.
pub async fn insert_missing_assignments(
    db: &SqlitePool,
    course_id: &str,
    student_ids: &BTreeSet<String>,
    assigned_by: &str,
) -> Result<usize, AppError> {
    let now = Utc::now();
    let mut inserted = 0;

    for student_id in student_ids {
        let affected = sqlx::query(
            r#"
            INSERT INTO course_assignments (course_id, student_id, assigned_by, assigned_at, is_active)
            VALUES (?1, ?2, ?3, ?4, 1)
            ON CONFLICT(course_id, student_id) DO NOTHING
            "#,
        )
        .bind(course_id)
        .bind(student_id)
        .bind(assigned_by)
        .bind(now)
        .execute(db)
        .await?
        .rows_affected();
        inserted += affected as usize;
    }

    Ok(inserted)
}

pub async fn deactivate_assignments(
    db: &SqlitePool,
    course_id: &str,
    student_ids: &BTreeSet<String>,
) -> Result<usize, AppError> {
    let mut changed = 0;

    for student_id in student_ids {
        let affected = sqlx::query(
            "UPDATE course_assignments SET is_active = 0 WHERE course_id = ? AND student_id = ? AND is_active = 1",
        )
        .bind(course_id)
        .bind(student_id)
        .execute(db)
        .await?
        .rows_affected();
        changed += affected as usize;
    }

    Ok(changed)
}

/// Links course and class. A single row backs both `assignedClasses` and
/// `assignedCourses`. Unknown classes are skipped; returns whether a row was
/// inserted.
pub async fn link_class(db: &SqlitePool, course_id: &str, class_id: &str) -> Result<bool, AppError> {
    let affected = sqlx::query(
        r#"
        INSERT INTO course_classes (course_id, class_id, linked_at)
        SELECT ?1, id, ?3 FROM class_groups WHERE id = ?2
        ON CONFLICT(course_id, class_id) DO NOTHING
        "#,
    )
    .bind(course_id)
    .bind(class_id)
    .bind(Utc::now())
    .execute(db)
    .await?
    .rows_affected();

    Ok(affected > 0)
}

pub async fn linked_classes(db: &SqlitePool, course_id: &str) -> Result<BTreeSet<String>, AppError> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT class_id FROM course_classes WHERE course_id = ?")
        .bind(course_id)
        .fetch_all(db)
        .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Whether `subject_id` may read the course: an active assignment, or
/// membership of a class linked to it.
pub async fn is_member(db: &SqlitePool, course_id: &str, subject_id: &str) -> Result<bool, AppError> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM course_assignments
                WHERE course_id = ?1 AND student_id = ?2 AND is_active = 1)
          + (SELECT COUNT(*) FROM course_classes cc
                JOIN class_students cs ON cs.class_id = cc.class_id
                WHERE cc.course_id = ?1 AND cs.student_id = ?2)
        "#,
    )
    .bind(course_id)
    .bind(subject_id)
    .fetch_one(db)
    .await?;

    Ok(count > 0)
}

/// A slug is taken in CourseStore if a course other than `exclude_id` uses it
/// or a claim not held by `exclude_id` exists.
pub async fn slug_taken(db: &SqlitePool, slug: &str, exclude_id: Option<&str>) -> Result<bool, AppError> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM courses WHERE slug = ?1 AND (?2 IS NULL OR id != ?2))
          + (SELECT COUNT(*) FROM slug_reservations
                WHERE slug = ?1 AND (?2 IS NULL OR course_id IS NULL OR course_id != ?2))
        "#,
    )
    .bind(slug)
    .bind(exclude_id)
    .fetch_one(db)
    .await?;

    Ok(count > 0)
}

/// Claims `slug`. The primary key on `slug_reservations` is what actually
/// arbitrates concurrent claims; returns `false` if someone else holds it.
pub async fn reserve_slug(db: &SqlitePool, slug: &str, course_id: Option<&str>) -> Result<bool, AppError> {
    let affected = sqlx::query(
        r#"
        INSERT INTO slug_reservations (slug, course_id, claimed_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(slug) DO UPDATE SET course_id = excluded.course_id
        WHERE ?2 IS NOT NULL AND slug_reservations.course_id = ?2
        "#,
    )
    .bind(slug)
    .bind(course_id)
    .bind(Utc::now())
    .execute(db)
    .await?
    .rows_affected();

    Ok(affected > 0)
}

pub async fn release_slug(db: &SqlitePool, slug: &str, course_id: Option<&str>) -> Result<(), AppError> {
    sqlx::query("DELETE FROM slug_reservations WHERE slug = ?1 AND course_id IS ?2")
        .bind(slug)
        .bind(course_id)
        .execute(db)
        .await?;

    Ok(())
}

pub async fn release_stale_reservations(db: &SqlitePool, older_than: DateTime<Utc>) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM slug_reservations WHERE course_id IS NULL AND claimed_at < ?")
        .bind(older_than)
        .execute(db)
        .await?;

    Ok(result.rows_affected())
}
