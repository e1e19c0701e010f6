use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::classes;
use crate::error::{AppError, StoreKind, SyncOperation};
use crate::identity::{Identity, authorize_owner, require_author};
use crate::models::{ClassGroup, ClassView, NewClassRequest};
use crate::services::sync_engine::SyncEngine;

/// Class lifecycle. CourseStore is written first, the projection follows.
/// Membership changes never fan out to courses already linked.
pub struct ClassService {
    db: SqlitePool,
    engine: Arc<SyncEngine>,
}

fn membership_failure(class_id: &str, cause: AppError) -> AppError {
    warn!("class {} did not reach the projection: {}", class_id, cause);
    AppError::PartialFailure {
        failed: StoreKind::Projection,
        operation: SyncOperation::ClassMembership,
    }
}

impl ClassService {
    pub fn new(db: SqlitePool, engine: Arc<SyncEngine>) -> Self {
        Self { db, engine }
    }

    async fn load(&self, class_id: &str) -> Result<ClassView, AppError> {
        self.engine
            .on_store("load class", || classes::load_class_view(&self.db, class_id))
            .await?
            .ok_or_else(|| AppError::not_found("class", class_id))
    }

    async fn propagate(&self, view: &ClassView) -> Result<(), AppError> {
        self.engine
            .push_class(view)
            .await
            .map_err(|e| membership_failure(&view.class.id, e))
    }

    pub async fn get_class(&self, actor: &Identity, class_id: &str) -> Result<ClassView, AppError> {
        let view = self.load(class_id).await?;
        if !view.students.contains(&actor.subject_id) {
            authorize_owner(actor, &view.class.owner_id)?;
        }
        Ok(view)
    }

    pub async fn create_class(&self, actor: &Identity, req: NewClassRequest) -> Result<ClassView, AppError> {
        require_author(actor)?;
        if req.name.trim().is_empty() {
            return Err(AppError::BadRequest("class name is required".to_string()));
        }

        let now = Utc::now();
        let class = ClassGroup {
            id: req.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: req.name.trim().to_string(),
            grade_level: req.grade_level,
            owner_id: actor.subject_id.clone(),
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self
            .engine
            .on_store("insert class", || classes::insert_class(&self.db, &class))
            .await
        {
            if e.is_unique_violation() {
                return Err(AppError::Conflict(format!("class {} already exists", class.id)));
            }
            return Err(e);
        }
        self.engine
            .on_store("add class students", || classes::add_students(&self.db, &class.id, &req.students))
            .await?;

        let view = self.load(&class.id).await?;
        self.propagate(&view).await?;
        info!("created class {} with {} student(s)", class.id, view.students.len());
        Ok(view)
    }

    pub async fn add_student(&self, actor: &Identity, class_id: &str, student_id: &str) -> Result<ClassView, AppError> {
        let view = self.load(class_id).await?;
        authorize_owner(actor, &view.class.owner_id)?;
        if student_id.trim().is_empty() {
            return Err(AppError::BadRequest("student id is required".to_string()));
        }

        let joining = BTreeSet::from([student_id.to_string()]);
        let added = self
            .engine
            .on_store("add class student", || classes::add_students(&self.db, class_id, &joining))
            .await?;
        let view = self.load(class_id).await?;
        if added > 0 {
            self.propagate(&view).await?;
        }
        Ok(view)
    }

    pub async fn remove_student(&self, actor: &Identity, class_id: &str, student_id: &str) -> Result<ClassView, AppError> {
        let view = self.load(class_id).await?;
        authorize_owner(actor, &view.class.owner_id)?;

        let removed = self
            .engine
            .on_store("remove class student", || classes::remove_student(&self.db, class_id, student_id))
            .await?;
        if !removed {
            return Err(AppError::not_found("class member", student_id));
        }
        let view = self.load(class_id).await?;
        self.propagate(&view).await?;
        Ok(view)
    }

    /// Refused while any course still lists the class.
    pub async fn delete_class(&self, actor: &Identity, class_id: &str) -> Result<(), AppError> {
        let view = self.load(class_id).await?;
        authorize_owner(actor, &view.class.owner_id)?;

        self.engine
            .on_store("delete class", || classes::delete_class(&self.db, class_id))
            .await?;
        self.engine
            .delete_class_document(class_id)
            .await
            .map_err(|e| membership_failure(class_id, e))?;
        info!("deleted class {}", class_id);
        Ok(())
    }

    /// Re-pushes the class document from CourseStore.
    pub async fn reconcile_class(&self, actor: &Identity, class_id: &str) -> Result<ClassView, AppError> {
        let view = self.load(class_id).await?;
        authorize_owner(actor, &view.class.owner_id)?;
        self.engine.push_class(&view).await?;
        Ok(view)
    }
}
