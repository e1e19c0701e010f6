use std::collections::BTreeSet;
use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db::{classes, repository};
use crate::error::{AppError, StoreKind, SyncOperation};
use crate::identity::{Identity, authorize_owner};
use crate::models::{FanoutResult, MergeOp};
use crate::services::sync_engine::SyncEngine;

/// Assigns a course to every student of a class, then links the two.
///
/// The student list is snapshotted when the call starts. Students who join
/// the class afterwards are not added to the course.
pub struct ClassFanoutAssigner {
    db: SqlitePool,
    engine: Arc<SyncEngine>,
    require_students: bool,
}

impl ClassFanoutAssigner {
    pub fn new(db: SqlitePool, engine: Arc<SyncEngine>, require_students: bool) -> Self {
        Self {
            db,
            engine,
            require_students,
        }
    }

    pub async fn assign_course_to_class(
        &self,
        actor: &Identity,
        course_id: &str,
        class_id: &str,
    ) -> Result<FanoutResult, AppError> {
        let class = self
            .engine
            .on_store("find class", || classes::find_class(&self.db, class_id))
            .await?
            .ok_or_else(|| AppError::not_found("class", class_id))?;
        let course = self
            .engine
            .on_store("find course", || repository::find_course(&self.db, course_id))
            .await?
            .ok_or_else(|| AppError::not_found("course", course_id))?;

        authorize_owner(actor, &course.owner_id)?;
        authorize_owner(actor, &class.owner_id)?;

        let students = self
            .engine
            .on_store("list class students", || classes::students(&self.db, class_id))
            .await?;
        if students.is_empty() && self.require_students {
            return Err(AppError::InvalidState(format!("class {} has no students", class_id)));
        }

        let assigned = self
            .engine
            .on_store("list assignees", || repository::active_assignees(&self.db, course_id))
            .await?;
        let to_add: BTreeSet<String> = students.difference(&assigned).cloned().collect();

        let mut degraded = false;
        let students_added = match self
            .engine
            .merge_assignment(course_id, &to_add, MergeOp::Add, &actor.subject_id)
            .await
        {
            Ok(added) => added,
            Err(AppError::PartialFailure { failed, .. }) => {
                warn!(
                    "fan-out of class {} to course {} did not reach {}, linking anyway",
                    class_id, course_id, failed
                );
                degraded = true;
                0
            }
            Err(e) => return Err(e),
        };

        match self.engine.link_class(course_id, class_id).await {
            Ok(_) => {}
            Err(AppError::PartialFailure { .. }) => degraded = true,
            Err(e) => return Err(e),
        }

        if degraded {
            return Err(AppError::PartialFailure {
                failed: StoreKind::Projection,
                operation: SyncOperation::AssignClass,
            });
        }

        info!(
            "assigned course {} to class {}: {} of {} student(s) newly added",
            course_id,
            class_id,
            students_added,
            students.len()
        );
        Ok(FanoutResult {
            course_id: course_id.to_string(),
            class_id: class_id.to_string(),
            students_added,
        })
    }
}
