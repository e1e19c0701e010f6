use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::db::{classes, repository, sync_records};
use crate::error::{AppError, StoreKind, SyncOperation};
use crate::models::{ClassView, Course, CourseUpsert, CourseView, MergeOp, union_ordered};
use crate::projection::{ClassDocument, CourseDocument, MemberField, ProjectionClient};
use crate::services::retry::{RetryPolicy, with_timeout};
use crate::services::slug::SlugAllocator;

const PENDING_BATCH: i64 = 100;
const STALE_RESERVATION_AGE: Duration = Duration::from_secs(60 * 60);
const SLUG_WRITE_ATTEMPTS: u32 = 3;

/// How payload members reach `course_assignments`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberWrite {
    /// Insert rows that are missing; an explicit removal stays removed.
    BackFill,
    /// The payload members are already live in the origin store: (re)activate them.
    Activate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Applied(CourseView),
    /// The payload is older than what has already been applied.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    Synced(CourseView),
    /// A pending delete was carried through.
    Deleted,
}

#[derive(Debug, Default, Serialize)]
pub struct ReconcileStats {
    pub reconciled: usize,
    pub deleted: usize,
    pub failed: usize,
    pub released_slugs: u64,
}

/// Keeps CourseStore and the projection converged.
///
/// Course rows are written with a compare-and-set on `courses.version`;
/// membership is written row by row, and on the projection through array
/// transforms, so concurrent updates to one course never drop each other's
/// collection entries.
pub struct SyncEngine {
    db: SqlitePool,
    projection: Arc<dyn ProjectionClient>,
    slugs: Arc<SlugAllocator>,
    retry: RetryPolicy,
    store_timeout: Duration,
}

fn source_version(course: &CourseUpsert) -> i64 {
    course.updated_at.timestamp_micros()
}

impl SyncEngine {
    pub fn new(
        db: SqlitePool,
        projection: Arc<dyn ProjectionClient>,
        slugs: Arc<SlugAllocator>,
        retry: RetryPolicy,
        store_timeout: Duration,
    ) -> Self {
        Self {
            db,
            projection,
            slugs,
            retry,
            store_timeout,
        }
    }

    pub fn slugs(&self) -> &SlugAllocator {
        &self.slugs
    }

    /// One CourseStore call under the retry policy and store timeout.
    pub(crate) async fn on_store<T, F, Fut>(&self, label: &str, op: F) -> Result<T, AppError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let limit = self.store_timeout;
        self.retry
            .run(label, || with_timeout(StoreKind::CourseStore, limit, op()))
            .await
    }

    async fn on_projection<T, F, Fut>(&self, label: &str, op: F) -> Result<T, AppError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let limit = self.store_timeout;
        self.retry
            .run(label, || with_timeout(StoreKind::Projection, limit, op()))
            .await
    }

    /// Leaves a marker for the reconcile sweep and builds the error the caller
    /// sees. The origin write stays committed.
    async fn partial_failure(
        &self,
        course_id: &str,
        version: i64,
        failed: StoreKind,
        operation: SyncOperation,
        cause: &AppError,
    ) -> AppError {
        warn!("{} of course {} did not reach {}: {}", operation, course_id, failed, cause);
        if let Err(e) = sync_records::mark_pending(&self.db, course_id, version, failed, operation).await {
            error!("could not record pending {} for course {}: {}", operation, course_id, e);
        }
        AppError::PartialFailure { failed, operation }
    }

    /// Applies `payload` with `origin` as the store written first. Scalars
    /// overwrite, collections are unioned. A payload older than the last
    /// applied one is a no-op; an equal one re-applies to the same state.
    pub async fn upsert(&self, payload: CourseUpsert, origin: StoreKind) -> Result<UpsertOutcome, AppError> {
        if payload.id.trim().is_empty() || payload.owner_id.trim().is_empty() {
            return Err(AppError::BadRequest("course id and owner are required".to_string()));
        }

        let version = source_version(&payload);
        let record = self
            .on_store("fetch sync record", || sync_records::fetch(&self.db, &payload.id))
            .await?;
        if let Some(record) = record {
            if record.source_version > version {
                info!(
                    "skipping stale upsert of course {} ({} < {})",
                    payload.id, version, record.source_version
                );
                return Ok(UpsertOutcome::Stale);
            }
        }

        let view = match origin {
            StoreKind::CourseStore => self.upsert_from_store(&payload, version).await?,
            StoreKind::Projection => self.upsert_from_projection(&payload, version).await?,
        };

        self.on_store("mark synced", || sync_records::mark_synced(&self.db, &payload.id, version))
            .await?;
        debug!("upserted course {} from {}", payload.id, origin);
        Ok(UpsertOutcome::Applied(view))
    }

    async fn upsert_from_store(&self, payload: &CourseUpsert, version: i64) -> Result<CourseView, AppError> {
        let stored_slug = self
            .on_store("find course", || repository::find_course(&self.db, &payload.id))
            .await?
            .map(|course| course.slug);
        let projected_slug = match &stored_slug {
            Some(_) => None,
            None => self
                .on_projection("fetch course document", || self.projection.fetch_course(&payload.id))
                .await?
                .map(|doc| doc.slug),
        };
        let slug = self
            .resolve_slug(payload, stored_slug.as_deref(), projected_slug.as_deref())
            .await?;

        let (view, linked) = self.apply_to_store(payload, &slug, MemberWrite::BackFill).await?;
        let old_slug = stored_slug.or(projected_slug);
        self.release_replaced_slug(&payload.id, old_slug.as_deref(), &view.course.slug)
            .await;

        if let Err(e) = self.push_view(&view, &linked).await {
            return Err(self
                .partial_failure(&payload.id, version, StoreKind::Projection, SyncOperation::Upsert, &e)
                .await);
        }
        Ok(view)
    }

    async fn upsert_from_projection(&self, payload: &CourseUpsert, version: i64) -> Result<CourseView, AppError> {
        let existing = self
            .on_projection("fetch course document", || self.projection.fetch_course(&payload.id))
            .await?;
        let stored = self
            .on_store("find course", || repository::find_course(&self.db, &payload.id))
            .await?;

        let stored_slug = stored.as_ref().map(|c| c.slug.clone());
        let projected_slug = existing.as_ref().map(|d| d.slug.clone());
        let slug = self
            .resolve_slug(payload, stored_slug.as_deref(), projected_slug.as_deref())
            .await?;
        let current_slug = stored_slug.or(projected_slug);

        let created_at = existing
            .as_ref()
            .map(|d| d.created_at)
            .or_else(|| stored.as_ref().map(|c| c.created_at))
            .unwrap_or(payload.updated_at);
        let doc = CourseDocument {
            id: payload.id.clone(),
            title: payload.title.clone(),
            slug: slug.clone(),
            owner_id: payload.owner_id.clone(),
            subject: payload.subject.clone(),
            year_of_study: payload.year_of_study,
            is_active: payload.is_active,
            links: payload.links.clone(),
            attachment_urls: payload.attachment_urls.clone(),
            assigned_users: payload.assigned_users.iter().cloned().collect(),
            assigned_classes: payload.assigned_classes.iter().cloned().collect(),
            created_at,
            updated_at: payload.updated_at,
        };

        if let Err(e) = self
            .on_projection("merge course document", || self.projection.merge_course(&doc))
            .await
        {
            if current_slug.as_deref() != Some(slug.as_str()) {
                if let Err(release_err) = self.slugs.release(&slug, Some(&payload.id)).await {
                    warn!("could not release slug {} of course {}: {}", slug, payload.id, release_err);
                }
            }
            return Err(e);
        }

        let (view, linked) = match self.apply_to_store(payload, &slug, MemberWrite::Activate).await {
            Ok(applied) => applied,
            Err(e) => {
                return Err(self
                    .partial_failure(&payload.id, version, StoreKind::CourseStore, SyncOperation::Upsert, &e)
                    .await);
            }
        };
        self.release_replaced_slug(&payload.id, current_slug.as_deref(), &view.course.slug)
            .await;

        if let Err(e) = self.push_view(&view, &linked).await {
            return Err(self
                .partial_failure(&payload.id, version, StoreKind::Projection, SyncOperation::Upsert, &e)
                .await);
        }
        Ok(view)
    }

    /// The slug CourseStore already holds is kept unless regeneration is asked
    /// for. Any other candidate, the one a projection document carries or the
    /// one the payload asks for, is used only once it could be claimed.
    async fn resolve_slug(
        &self,
        payload: &CourseUpsert,
        stored: Option<&str>,
        projected: Option<&str>,
    ) -> Result<String, AppError> {
        if !payload.regenerate_slug {
            if let Some(stored) = stored {
                return Ok(stored.to_string());
            }
            if let Some(candidate) = projected.or(payload.slug.as_deref()) {
                if self.slugs.claim_exact(candidate, &payload.id).await? {
                    return Ok(candidate.to_string());
                }
                info!("slug {} for course {} is taken, allocating", candidate, payload.id);
            }
        }

        self.slugs.allocate(&payload.title, Some(&payload.id)).await
    }

    async fn release_replaced_slug(&self, course_id: &str, old: Option<&str>, new: &str) {
        let Some(old) = old else {
            return;
        };
        if old == new {
            return;
        }
        if let Err(e) = self.slugs.release(old, Some(course_id)).await {
            warn!("could not release slug {} of course {}: {}", old, course_id, e);
        }
    }

    /// Writes the course row, records payload members and links known classes.
    /// Returns the fresh view and the classes newly linked. The row may end up
    /// with another slug than `slug` if CourseStore refuses that one.
    async fn apply_to_store(
        &self,
        payload: &CourseUpsert,
        slug: &str,
        members: MemberWrite,
    ) -> Result<(CourseView, Vec<String>), AppError> {
        let mut slug = slug.to_string();
        let mut attempts = 0;
        loop {
            let written = self.on_store("write course", || self.write_course(payload, &slug)).await;
            match written {
                Ok(()) => break,
                Err(AppError::SlugTaken(taken)) if attempts < SLUG_WRITE_ATTEMPTS => {
                    attempts += 1;
                    warn!("slug {} of course {} is used by another course, allocating again", taken, payload.id);
                    if let Err(e) = self.slugs.release(&taken, Some(&payload.id)).await {
                        warn!("could not release slug {} of course {}: {}", taken, payload.id, e);
                    }
                    slug = self.slugs.allocate(&payload.title, Some(&payload.id)).await?;
                }
                Err(AppError::SlugTaken(taken)) => {
                    return Err(AppError::Conflict(format!(
                        "could not find a free slug for course {} (last tried {})",
                        payload.id, taken
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        if !payload.assigned_users.is_empty() {
            let changed = match members {
                MemberWrite::BackFill => {
                    self.on_store("insert assignments", || {
                        repository::insert_missing_assignments(
                            &self.db,
                            &payload.id,
                            &payload.assigned_users,
                            &payload.owner_id,
                        )
                    })
                    .await?
                }
                MemberWrite::Activate => {
                    self.on_store("activate assignments", || {
                        repository::activate_assignments(
                            &self.db,
                            &payload.id,
                            &payload.assigned_users,
                            &payload.owner_id,
                        )
                    })
                    .await?
                }
            };
            debug!("course {}: {} assignment(s) written ({:?})", payload.id, changed, members);
        }

        let mut linked = Vec::new();
        for class_id in &payload.assigned_classes {
            let inserted = self
                .on_store("link class", || repository::link_class(&self.db, &payload.id, class_id))
                .await?;
            if inserted {
                linked.push(class_id.clone());
            }
        }

        let view = self
            .on_store("load course", || repository::load_course_view(&self.db, &payload.id))
            .await?
            .ok_or_else(|| AppError::not_found("course", &payload.id))?;
        Ok((view, linked))
    }

    /// One read-merge-write round of the course row.
    async fn write_course(&self, payload: &CourseUpsert, slug: &str) -> Result<(), AppError> {
        match repository::find_course(&self.db, &payload.id).await? {
            None => {
                let course = Course {
                    id: payload.id.clone(),
                    title: payload.title.clone(),
                    slug: slug.to_string(),
                    owner_id: payload.owner_id.clone(),
                    subject: payload.subject.clone(),
                    year_of_study: payload.year_of_study,
                    is_active: payload.is_active,
                    links: union_ordered(&[], &payload.links),
                    attachment_urls: union_ordered(&[], &payload.attachment_urls),
                    version: 1,
                    created_at: payload.updated_at,
                    updated_at: payload.updated_at,
                };
                match repository::insert_course(&self.db, &course).await {
                    Err(e) if e.is_unique_violation_on("courses.slug") => Err(AppError::SlugTaken(slug.to_string())),
                    Err(e) if e.is_unique_violation() => Err(AppError::VersionConflict(format!(
                        "course {} was created concurrently",
                        payload.id
                    ))),
                    other => other,
                }
            }
            Some(current) => {
                let merged = Course {
                    id: current.id.clone(),
                    title: payload.title.clone(),
                    slug: slug.to_string(),
                    owner_id: payload.owner_id.clone(),
                    subject: payload.subject.clone(),
                    year_of_study: payload.year_of_study,
                    is_active: payload.is_active,
                    links: union_ordered(&current.links, &payload.links),
                    attachment_urls: union_ordered(&current.attachment_urls, &payload.attachment_urls),
                    version: current.version,
                    created_at: current.created_at,
                    updated_at: current.updated_at.max(payload.updated_at),
                };
                if merged == current {
                    return Ok(());
                }
                match repository::update_course_cas(&self.db, &merged, current.version).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(AppError::VersionConflict(format!("course {} changed underneath", payload.id))),
                    Err(e) if e.is_unique_violation_on("courses.slug") => Err(AppError::SlugTaken(slug.to_string())),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Merges the CourseStore view into the projection, strips members that
    /// were explicitly removed and records the given class links on both sides.
    async fn push_view(&self, view: &CourseView, link: &[String]) -> Result<(), AppError> {
        let course_id = &view.course.id;
        let doc = CourseDocument::from_view(view);
        self.on_projection("merge course document", || self.projection.merge_course(&doc))
            .await?;

        let removed: Vec<String> = self
            .on_store("fetch assignments", || repository::fetch_assignments(&self.db, course_id))
            .await?
            .into_iter()
            .filter(|a| !a.is_active)
            .map(|a| a.student_id)
            .collect();
        if !removed.is_empty() {
            self.on_projection("remove members", || {
                self.projection
                    .merge_course_members(course_id, MemberField::AssignedUsers, &removed, MergeOp::Remove)
            })
            .await?;
        }

        for class_id in link {
            self.link_in_projection(course_id, class_id).await?;
        }
        Ok(())
    }

    async fn link_in_projection(&self, course_id: &str, class_id: &str) -> Result<(), AppError> {
        let first = self
            .on_projection("link course class", || self.projection.link_course_class(course_id, class_id))
            .await;
        match first {
            Err(AppError::NotFound(_)) => {
                debug!("class {} missing from projection, pushing it before linking", class_id);
                let class = self
                    .on_store("load class", || classes::load_class_view(&self.db, class_id))
                    .await?
                    .ok_or_else(|| AppError::not_found("class", class_id))?;
                self.push_class(&class).await?;
                self.on_projection("link course class", || self.projection.link_course_class(course_id, class_id))
                    .await
            }
            other => other,
        }
    }

    /// Removes the course from both stores. Its slug is freed for reuse.
    pub async fn delete(&self, course_id: &str) -> Result<(), AppError> {
        let stored = self
            .on_store("load course", || repository::load_course_view(&self.db, course_id))
            .await?;
        let doc = self
            .on_projection("fetch course document", || self.projection.fetch_course(course_id))
            .await?;
        if stored.is_none() && doc.is_none() {
            return Err(AppError::not_found("course", course_id));
        }

        let mut linked: BTreeSet<String> = stored
            .as_ref()
            .map(|v| v.assigned_classes.clone())
            .unwrap_or_default();
        if let Some(doc) = &doc {
            linked.extend(doc.assigned_classes.iter().cloned());
        }
        let version = stored
            .as_ref()
            .map(|v| v.course.updated_at.timestamp_micros())
            .unwrap_or_default();

        self.on_store("delete course", || repository::delete_course(&self.db, course_id))
            .await?;

        if let Err(e) = self.delete_in_projection(course_id, &linked).await {
            return Err(self
                .partial_failure(course_id, version, StoreKind::Projection, SyncOperation::Delete, &e)
                .await);
        }

        self.on_store("remove sync record", || sync_records::remove(&self.db, course_id))
            .await?;
        info!("deleted course {}", course_id);
        Ok(())
    }

    async fn delete_in_projection(&self, course_id: &str, linked: &BTreeSet<String>) -> Result<(), AppError> {
        for class_id in linked {
            self.on_projection("unlink course class", || {
                self.projection.unlink_course_from_class(class_id, course_id)
            })
            .await?;
        }
        self.on_projection("delete course document", || self.projection.delete_course(course_id))
            .await
    }

    /// Adds or removes individual assignments in both stores and returns how
    /// many assignments actually changed in CourseStore.
    pub async fn merge_assignment(
        &self,
        course_id: &str,
        subject_ids: &BTreeSet<String>,
        op: MergeOp,
        assigned_by: &str,
    ) -> Result<usize, AppError> {
        let view = self
            .on_store("load course", || repository::load_course_view(&self.db, course_id))
            .await?
            .ok_or_else(|| AppError::not_found("course", course_id))?;
        if subject_ids.is_empty() {
            return Ok(0);
        }

        let changed = match op {
            MergeOp::Add => {
                self.on_store("activate assignments", || {
                    repository::activate_assignments(&self.db, course_id, subject_ids, assigned_by)
                })
                .await?
            }
            MergeOp::Remove => {
                self.on_store("deactivate assignments", || {
                    repository::deactivate_assignments(&self.db, course_id, subject_ids)
                })
                .await?
            }
        };

        let members: Vec<String> = subject_ids.iter().cloned().collect();
        let merged = self
            .on_projection("merge members", || {
                self.projection
                    .merge_course_members(course_id, MemberField::AssignedUsers, &members, op)
            })
            .await;
        let result = match merged {
            Err(AppError::NotFound(_)) => {
                let fresh = self
                    .on_store("load course", || repository::load_course_view(&self.db, course_id))
                    .await?
                    .unwrap_or_else(|| view.clone());
                self.push_view(&fresh, &[]).await
            }
            other => other,
        };

        if let Err(e) = result {
            let version = view.course.updated_at.timestamp_micros();
            return Err(self
                .partial_failure(course_id, version, StoreKind::Projection, SyncOperation::MergeAssignment, &e)
                .await);
        }

        debug!("course {}: {:?} changed {} assignment(s)", course_id, op, changed);
        Ok(changed)
    }

    /// Links course and class in both stores. Returns `false` when they were
    /// already linked in CourseStore.
    pub async fn link_class(&self, course_id: &str, class_id: &str) -> Result<bool, AppError> {
        let inserted = self
            .on_store("link class", || repository::link_class(&self.db, course_id, class_id))
            .await?;

        if let Err(e) = self.link_in_projection(course_id, class_id).await {
            let version = self
                .on_store("find course", || repository::find_course(&self.db, course_id))
                .await?
                .map(|c| c.updated_at.timestamp_micros())
                .unwrap_or_default();
            return Err(self
                .partial_failure(course_id, version, StoreKind::Projection, SyncOperation::AssignClass, &e)
                .await);
        }
        Ok(inserted)
    }

    /// Recomputes the projection from CourseStore after back-filling into
    /// CourseStore whatever only the projection holds. Explicitly removed
    /// members are not back-filled.
    pub async fn reconcile(&self, course_id: &str) -> Result<Reconciled, AppError> {
        let record = self
            .on_store("fetch sync record", || sync_records::fetch(&self.db, course_id))
            .await?;
        if record.as_ref().and_then(|r| r.pending_op.as_deref()) == Some(SyncOperation::Delete.as_str()) {
            info!("finishing pending delete of course {}", course_id);
            return self.finish_delete(course_id).await.map(|_| Reconciled::Deleted);
        }

        let stored = self
            .on_store("find course", || repository::find_course(&self.db, course_id))
            .await?;
        let doc = self
            .on_projection("fetch course document", || self.projection.fetch_course(course_id))
            .await?;

        let view = match (stored, doc) {
            (Some(course), doc) => {
                let mut payload = CourseUpsert::from_course(&course);
                if let Some(doc) = doc {
                    payload.links = doc.links;
                    payload.attachment_urls = doc.attachment_urls;
                    payload.assigned_users = doc.assigned_users.into_iter().collect();
                    payload.assigned_classes = doc.assigned_classes.into_iter().collect();
                }
                let (view, _) = self.apply_to_store(&payload, &course.slug, MemberWrite::BackFill).await?;
                view
            }
            (None, Some(doc)) => {
                info!("course {} only exists in the projection, back-filling", course_id);
                let payload = CourseUpsert {
                    id: doc.id.clone(),
                    title: doc.title,
                    slug: Some(doc.slug.clone()),
                    regenerate_slug: false,
                    owner_id: doc.owner_id,
                    subject: doc.subject,
                    year_of_study: doc.year_of_study,
                    is_active: doc.is_active,
                    links: doc.links,
                    attachment_urls: doc.attachment_urls,
                    assigned_users: doc.assigned_users.into_iter().collect(),
                    assigned_classes: doc.assigned_classes.into_iter().collect(),
                    updated_at: doc.updated_at,
                };
                let slug = self.resolve_slug(&payload, None, payload.slug.as_deref()).await?;
                let (view, _) = self.apply_to_store(&payload, &slug, MemberWrite::BackFill).await?;
                view
            }
            (None, None) => {
                if record.is_some() {
                    self.on_store("remove sync record", || sync_records::remove(&self.db, course_id))
                        .await?;
                }
                return Err(AppError::not_found("course", course_id));
            }
        };

        let links: Vec<String> = view.assigned_classes.iter().cloned().collect();
        self.push_view(&view, &links).await?;

        let version = view.course.updated_at.timestamp_micros();
        self.on_store("mark synced", || sync_records::mark_synced(&self.db, course_id, version))
            .await?;
        debug!("reconciled course {}", course_id);
        Ok(Reconciled::Synced(view))
    }

    async fn finish_delete(&self, course_id: &str) -> Result<(), AppError> {
        let mut linked = self
            .on_store("linked classes", || repository::linked_classes(&self.db, course_id))
            .await?;
        if let Some(doc) = self
            .on_projection("fetch course document", || self.projection.fetch_course(course_id))
            .await?
        {
            linked.extend(doc.assigned_classes);
        }

        self.on_store("delete course", || repository::delete_course(&self.db, course_id))
            .await?;
        self.delete_in_projection(course_id, &linked).await?;
        self.on_store("remove sync record", || sync_records::remove(&self.db, course_id))
            .await
    }

    /// Reconciles every course with a pending marker and frees abandoned slug
    /// claims. One course failing does not stop the sweep.
    pub async fn reconcile_pending(&self) -> Result<ReconcileStats, AppError> {
        let mut stats = ReconcileStats::default();
        let pending = self
            .on_store("fetch pending", || sync_records::fetch_pending(&self.db, PENDING_BATCH))
            .await?;

        for record in pending {
            match self.reconcile(&record.course_id).await {
                Ok(Reconciled::Synced(_)) => stats.reconciled += 1,
                Ok(Reconciled::Deleted) => stats.deleted += 1,
                Err(e) => {
                    warn!("reconcile of course {} failed: {}", record.course_id, e);
                    stats.failed += 1;
                }
            }
        }

        stats.released_slugs = self.slugs.release_stale(STALE_RESERVATION_AGE).await?;
        Ok(stats)
    }

    /// Merges a class into the projection and removes students CourseStore
    /// no longer lists.
    pub async fn push_class(&self, view: &ClassView) -> Result<(), AppError> {
        let class_id = &view.class.id;
        let existing = self
            .on_projection("fetch class document", || self.projection.fetch_class(class_id))
            .await?;

        let doc = ClassDocument::from_view(view);
        self.on_projection("merge class document", || self.projection.merge_class(&doc))
            .await?;

        if let Some(existing) = existing {
            let gone: Vec<String> = existing
                .students
                .into_iter()
                .filter(|s| !view.students.contains(s))
                .collect();
            if !gone.is_empty() {
                self.on_projection("remove class students", || {
                    self.projection.merge_class_students(class_id, &gone, MergeOp::Remove)
                })
                .await?;
            }
        }
        Ok(())
    }

    pub async fn delete_class_document(&self, class_id: &str) -> Result<(), AppError> {
        self.on_projection("delete class document", || self.projection.delete_class(class_id))
            .await
    }
}
