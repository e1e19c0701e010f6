use std::collections::BTreeSet;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::AppError;
use crate::models::{ClassGroup, ClassView};

pub async fn find_class(db: &SqlitePool, id: &str) -> Result<Option<ClassGroup>, AppError> {
    let class = sqlx::query_as::<_, ClassGroup>(
        "SELECT id, name, grade_level, owner_id, created_at, updated_at FROM class_groups WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(db)
    .await?;

    Ok(class)
}

pub async fn insert_class(db: &SqlitePool, class: &ClassGroup) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO class_groups (id, name, grade_level, owner_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(&class.id)
    .bind(&class.name)
    .bind(class.grade_level)
    .bind(&class.owner_id)
    .bind(class.created_at)
    .bind(class.updated_at)
    .execute(db)
    .await?;

    Ok(())
}

fn still_assigned(id: &str) -> AppError {
    AppError::InvalidState(format!("class {} is still assigned to a course", id))
}

/// Deletes the class unless a course still links it. The link check and the
/// delete are one statement; a link that lands in between is refused by the
/// foreign key.
pub async fn delete_class(db: &SqlitePool, id: &str) -> Result<bool, AppError> {
    let deleted = sqlx::query(
        r#"
        DELETE FROM class_groups
        WHERE id = ?1
          AND NOT EXISTS (SELECT 1 FROM course_classes WHERE class_id = ?1)
        "#,
    )
    .bind(id)
    .execute(db)
    .await;

    let affected = match deleted {
        Ok(result) => result.rows_affected(),
        Err(e) => {
            let e = AppError::from(e);
            if e.is_foreign_key_violation() {
                return Err(still_assigned(id));
            }
            return Err(e);
        }
    };

    if affected == 0 && !assigned_courses(db, id).await?.is_empty() {
        return Err(still_assigned(id));
    }
    Ok(affected > 0)
}

pub async fn students(db: &SqlitePool, class_id: &str) -> Result<BTreeSet<String>, AppError> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT student_id FROM class_students WHERE class_id = ?")
        .bind(class_id)
        .fetch_all(db)
        .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn assigned_courses(db: &SqlitePool, class_id: &str) -> Result<BTreeSet<String>, AppError> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT course_id FROM course_classes WHERE class_id = ?")
        .bind(class_id)
        .fetch_all(db)
        .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn add_students(db: &SqlitePool, class_id: &str, student_ids: &BTreeSet<String>) -> Result<usize, AppError> {
    let now = Utc::now();
    let mut added = 0;

    for student_id in student_ids {
        let affected = sqlx::query(
            r#"
            INSERT INTO class_students (class_id, student_id, added_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(class_id, student_id) DO NOTHING
            "#,
        )
        .bind(class_id)
        .bind(student_id)
        .bind(now)
        .execute(db)
        .await?
        .rows_affected();
        added += affected as usize;
    }

    if added > 0 {
        touch(db, class_id).await?;
    }
    Ok(added)
}

pub async fn remove_student(db: &SqlitePool, class_id: &str, student_id: &str) -> Result<bool, AppError> {
    let affected = sqlx::query("DELETE FROM class_students WHERE class_id = ? AND student_id = ?")
        .bind(class_id)
        .bind(student_id)
        .execute(db)
        .await?
        .rows_affected();

    if affected > 0 {
        touch(db, class_id).await?;
    }
    Ok(affected > 0)
}

pub async fn load_class_view(db: &SqlitePool, id: &str) -> Result<Option<ClassView>, AppError> {
    let Some(class) = find_class(db, id).await? else {
        return Ok(None);
    };

    Ok(Some(ClassView {
        students: students(db, id).await?,
        assigned_courses: assigned_courses(db, id).await?,
        class,
    }))
}

async fn touch(db: &SqlitePool, class_id: &str) -> Result<(), AppError> {
    sqlx::query("UPDATE class_groups SET updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(class_id)
        .execute(db)
        .await?;
    Ok(())
}
