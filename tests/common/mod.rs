#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use course_sync::config::AppConfig;
use course_sync::db::classes;
use course_sync::error::{AppError, StoreKind};
use course_sync::identity::{Identity, Role, StaticIdentityResolver};
use course_sync::models::{ClassGroup, CourseUpsert, MergeOp};
use course_sync::projection::{ClassDocument, CourseDocument, InMemoryProjection, MemberField, ProjectionClient};
use course_sync::state::AppState;

pub async fn setup_test_db() -> SqlitePool {
    setup_test_db_with(SqlitePoolOptions::new()).await
}

/// Single-connection in-memory database built from `options`.
pub async fn setup_test_db_with(options: SqlitePoolOptions) -> SqlitePool {
    let pool = options
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test db");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("Failed to enable foreign keys");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

pub fn test_config() -> AppConfig {
    config_with(&[])
}

/// Test defaults with `overrides` taking precedence.
pub fn config_with(overrides: &[(&str, &str)]) -> AppConfig {
    AppConfig::from_lookup(|key| {
        if let Some((_, value)) = overrides.iter().find(|(k, _)| *k == key) {
            return Some(value.to_string());
        }
        match key {
            "RETRY_BASE_DELAY_MS" => Some("1".to_string()),
            "STORE_TIMEOUT_MS" => Some("2000".to_string()),
            "SLUG_PROBE_CAP" => Some("20".to_string()),
            _ => None,
        }
    })
    .expect("test config")
}

/// Wraps the in-memory projection; while `fail_writes` is set every write
/// fails as if the document store were down. Reads keep working.
#[derive(Default)]
pub struct FlakyProjection {
    pub inner: InMemoryProjection,
    fail_writes: AtomicBool,
}

impl FlakyProjection {
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(AppError::StoreUnavailable(StoreKind::Projection))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProjectionClient for FlakyProjection {
    async fn fetch_course(&self, id: &str) -> Result<Option<CourseDocument>, AppError> {
        self.inner.fetch_course(id).await
    }

    async fn list_courses(&self) -> Result<Vec<CourseDocument>, AppError> {
        self.inner.list_courses().await
    }

    async fn slug_owners(&self, slug: &str) -> Result<Vec<String>, AppError> {
        self.inner.slug_owners(slug).await
    }

    async fn merge_course(&self, doc: &CourseDocument) -> Result<(), AppError> {
        self.check()?;
        self.inner.merge_course(doc).await
    }

    async fn merge_course_members(
        &self,
        course_id: &str,
        field: MemberField,
        values: &[String],
        op: MergeOp,
    ) -> Result<(), AppError> {
        self.check()?;
        self.inner.merge_course_members(course_id, field, values, op).await
    }

    async fn delete_course(&self, id: &str) -> Result<(), AppError> {
        self.check()?;
        self.inner.delete_course(id).await
    }

    async fn fetch_class(&self, id: &str) -> Result<Option<ClassDocument>, AppError> {
        self.inner.fetch_class(id).await
    }

    async fn merge_class(&self, doc: &ClassDocument) -> Result<(), AppError> {
        self.check()?;
        self.inner.merge_class(doc).await
    }

    async fn merge_class_students(&self, class_id: &str, values: &[String], op: MergeOp) -> Result<(), AppError> {
        self.check()?;
        self.inner.merge_class_students(class_id, values, op).await
    }

    async fn link_course_class(&self, course_id: &str, class_id: &str) -> Result<(), AppError> {
        self.check()?;
        self.inner.link_course_class(course_id, class_id).await
    }

    async fn unlink_course_from_class(&self, class_id: &str, course_id: &str) -> Result<(), AppError> {
        self.check()?;
        self.inner.unlink_course_from_class(class_id, course_id).await
    }

    async fn delete_class(&self, id: &str) -> Result<(), AppError> {
        self.check()?;
        self.inner.delete_class(id).await
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.check()
    }
}

pub struct Harness {
    pub db: SqlitePool,
    pub projection: Arc<FlakyProjection>,
    pub state: AppState,
}

pub async fn harness() -> Harness {
    harness_with(test_config(), StaticIdentityResolver::default()).await
}

pub async fn harness_with(config: AppConfig, identity: StaticIdentityResolver) -> Harness {
    let db = setup_test_db().await;
    harness_on(config, identity, db)
}

/// Harness whose pool gives up on a busy connection after `acquire_timeout`,
/// so a held connection looks like a CourseStore outage.
pub async fn harness_with_acquire_timeout(config: AppConfig, acquire_timeout: Duration) -> Harness {
    let db = setup_test_db_with(SqlitePoolOptions::new().acquire_timeout(acquire_timeout)).await;
    harness_on(config, StaticIdentityResolver::default(), db)
}

fn harness_on(config: AppConfig, identity: StaticIdentityResolver, db: SqlitePool) -> Harness {
    let projection = Arc::new(FlakyProjection::default());
    let state = AppState::new(&config, db.clone(), projection.clone(), Arc::new(identity));
    Harness { db, projection, state }
}

pub fn teacher(id: &str) -> Identity {
    Identity::new(id, Role::Teacher)
}

pub fn student(id: &str) -> Identity {
    Identity::new(id, Role::Student)
}

pub fn ids(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

pub fn course_payload(id: &str, title: &str, owner: &str) -> CourseUpsert {
    CourseUpsert {
        id: id.to_string(),
        title: title.to_string(),
        slug: None,
        regenerate_slug: false,
        owner_id: owner.to_string(),
        subject: "math".to_string(),
        year_of_study: 1,
        is_active: true,
        links: Vec::new(),
        attachment_urls: Vec::new(),
        assigned_users: BTreeSet::new(),
        assigned_classes: BTreeSet::new(),
        updated_at: at("2026-03-01T10:00:00Z"),
    }
}

/// Creates a class directly in CourseStore, bypassing the projection.
pub async fn seed_class(db: &SqlitePool, id: &str, owner: &str, students: &[&str]) {
    let now = Utc::now();
    classes::insert_class(
        db,
        &ClassGroup {
            id: id.to_string(),
            name: format!("Klasa {}", id),
            grade_level: 2,
            owner_id: owner.to_string(),
            created_at: now,
            updated_at: now,
        },
    )
    .await
    .expect("Failed to insert class");
    classes::add_students(db, id, &ids(students))
        .await
        .expect("Failed to add students");
}
