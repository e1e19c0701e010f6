use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::{AppError, StoreKind, SyncOperation};
use crate::models::SyncRecord;

pub async fn fetch(db: &SqlitePool, course_id: &str) -> Result<Option<SyncRecord>, AppError> {
    let record = sqlx::query_as::<_, SyncRecord>(
        r#"
        SELECT course_id, source_version, last_synced_at, pending_store, pending_op, updated_at
        FROM sync_records
        WHERE course_id = ?
        "#,
    )
    .bind(course_id)
    .fetch_optional(db)
    .await?;

    Ok(record)
}

pub async fn fetch_pending(db: &SqlitePool, limit: i64) -> Result<Vec<SyncRecord>, AppError> {
    let records = sqlx::query_as::<_, SyncRecord>(
        r#"
        SELECT course_id, source_version, last_synced_at, pending_store, pending_op, updated_at
        FROM sync_records
        WHERE pending_store IS NOT NULL
        ORDER BY updated_at
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(db)
    .await?;

    Ok(records)
}

/// Records a fully propagated write. The source version only moves forward.
pub async fn mark_synced(db: &SqlitePool, course_id: &str, source_version: i64) -> Result<(), AppError> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO sync_records (course_id, source_version, last_synced_at, pending_store, pending_op, updated_at)
        VALUES (?1, ?2, ?3, NULL, NULL, ?3)
        ON CONFLICT(course_id) DO UPDATE SET
            source_version = MAX(sync_records.source_version, excluded.source_version),
            last_synced_at = excluded.last_synced_at,
            pending_store = NULL,
            pending_op = NULL,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(course_id)
    .bind(source_version)
    .bind(now)
    .execute(db)
    .await?;

    Ok(())
}

/// Records that `store` still has to receive `operation`. The source version
/// still advances: the origin store has accepted the write.
pub async fn mark_pending(
    db: &SqlitePool,
    course_id: &str,
    source_version: i64,
    store: StoreKind,
    operation: SyncOperation,
) -> Result<(), AppError> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO sync_records (course_id, source_version, last_synced_at, pending_store, pending_op, updated_at)
        VALUES (?1, ?2, NULL, ?3, ?4, ?5)
        ON CONFLICT(course_id) DO UPDATE SET
            source_version = MAX(sync_records.source_version, excluded.source_version),
            pending_store = excluded.pending_store,
            pending_op = CASE
                WHEN sync_records.pending_op = 'delete' THEN sync_records.pending_op
                ELSE excluded.pending_op
            END,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(course_id)
    .bind(source_version)
    .bind(store.as_str())
    .bind(operation.as_str())
    .bind(now)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn remove(db: &SqlitePool, course_id: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM sync_records WHERE course_id = ?")
        .bind(course_id)
        .execute(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test db");
        sqlx::migrate!("./migrations").run(&pool).await.expect("Failed to run migrations");
        pool
    }

    #[tokio::test]
    async fn test_source_version_never_moves_backwards() {
        let pool = setup_test_db().await;
        mark_synced(&pool, "c1", 200).await.unwrap();
        mark_synced(&pool, "c1", 100).await.unwrap();

        let record = fetch(&pool, "c1").await.unwrap().expect("record missing");
        assert_eq!(record.source_version, 200);
        assert!(record.pending_store.is_none());
    }

    #[tokio::test]
    async fn test_pending_delete_is_not_downgraded() {
        let pool = setup_test_db().await;
        mark_pending(&pool, "c1", 10, StoreKind::Projection, SyncOperation::Delete).await.unwrap();
        mark_pending(&pool, "c1", 10, StoreKind::Projection, SyncOperation::Upsert).await.unwrap();

        let pending = fetch_pending(&pool, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].pending_op.as_deref(), Some("delete"));
        assert_eq!(pending[0].pending_store.as_deref(), Some("projection"));

        mark_synced(&pool, "c1", 10).await.unwrap();
        assert!(fetch_pending(&pool, 10).await.unwrap().is_empty());
    }
}
