use axum::Json;
use axum::extract::Path;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, post};
use axum::{Router, extract::State, http::StatusCode, routing::get};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::db::repository;
use crate::error::{AppError, StoreKind};
use crate::identity::{Identity, Role, authorize_owner, authorize_read, require_author};
use crate::models::*;
use crate::services::{ReconcileStats, Reconciled, UpsertOutcome};
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct AssignmentResult {
    course_id: String,
    changed: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/courses", post(create_course))
        .route("/courses/{id}", get(get_course).put(update_course).delete(delete_course))
        .route("/courses/{id}/assignments", post(merge_assignment))
        .route("/courses/{id}/classes/{class_id}", post(assign_class))
        .route("/courses/{id}/reconcile", post(reconcile_course))
        .route("/classes", post(create_class))
        .route("/classes/{id}", get(get_class).delete(delete_class))
        .route("/classes/{id}/students", post(add_student))
        .route("/classes/{id}/students/{student_id}", delete(remove_student))
        .route("/classes/{id}/reconcile", post(reconcile_class))
        .route("/sync", post(sync_now))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(&state.db).await?;
    state.projection.health_check().await?;
    Ok(StatusCode::OK)
}

/// Owner of a course held by either store.
async fn course_owner(state: &AppState, id: &str) -> Result<String, AppError> {
    if let Some(course) = repository::find_course(&state.db, id).await? {
        return Ok(course.owner_id);
    }
    state
        .projection
        .fetch_course(id)
        .await?
        .map(|doc| doc.owner_id)
        .ok_or_else(|| AppError::not_found("course", id))
}

fn applied(outcome: UpsertOutcome) -> Result<Json<CourseView>, AppError> {
    match outcome {
        UpsertOutcome::Applied(view) => Ok(Json(view)),
        UpsertOutcome::Stale => Err(AppError::Conflict("a newer update was already applied".to_string())),
    }
}

async fn create_course(
    State(state): State<AppState>,
    actor: Identity,
    Json(req): Json<NewCourseRequest>,
) -> Result<Json<CourseView>, AppError> {
    require_author(&actor)?;
    let payload = CourseUpsert {
        id: Uuid::new_v4().to_string(),
        title: req.title.trim().to_string(),
        slug: None,
        regenerate_slug: false,
        owner_id: actor.subject_id.clone(),
        subject: req.subject,
        year_of_study: req.year_of_study,
        is_active: true,
        links: req.links,
        attachment_urls: req.attachment_urls,
        assigned_users: Default::default(),
        assigned_classes: Default::default(),
        updated_at: Utc::now(),
    };
    applied(state.engine.upsert(payload, StoreKind::CourseStore).await?)
}

async fn get_course(
    State(state): State<AppState>,
    actor: Identity,
    Path(id): Path<String>,
) -> Result<Json<CourseView>, AppError> {
    let view = repository::load_course_view(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::not_found("course", &id))?;
    let member = repository::is_member(&state.db, &id, &actor.subject_id).await?;
    authorize_read(&actor, &view.course.owner_id, member)?;
    Ok(Json(view))
}

async fn update_course(
    State(state): State<AppState>,
    actor: Identity,
    Path(id): Path<String>,
    Json(req): Json<UpdateCourseRequest>,
) -> Result<Json<CourseView>, AppError> {
    let course = repository::find_course(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::not_found("course", &id))?;
    authorize_owner(&actor, &course.owner_id)?;

    let mut payload = CourseUpsert::from_course(&course);
    if let Some(title) = req.title {
        payload.title = title.trim().to_string();
    }
    if let Some(subject) = req.subject {
        payload.subject = subject;
    }
    if let Some(year) = req.year_of_study {
        payload.year_of_study = year;
    }
    if let Some(active) = req.is_active {
        payload.is_active = active;
    }
    payload.links = req.links;
    payload.attachment_urls = req.attachment_urls;
    payload.regenerate_slug = req.regenerate_slug;
    payload.updated_at = Utc::now().max(course.updated_at);

    applied(state.engine.upsert(payload, StoreKind::CourseStore).await?)
}

async fn delete_course(
    State(state): State<AppState>,
    actor: Identity,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let owner = course_owner(&state, &id).await?;
    authorize_owner(&actor, &owner)?;
    state.engine.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn merge_assignment(
    State(state): State<AppState>,
    actor: Identity,
    Path(id): Path<String>,
    Json(req): Json<AssignmentRequest>,
) -> Result<Json<AssignmentResult>, AppError> {
    let owner = course_owner(&state, &id).await?;
    authorize_owner(&actor, &owner)?;
    let changed = state
        .engine
        .merge_assignment(&id, &req.subject_ids, req.op, &actor.subject_id)
        .await?;
    Ok(Json(AssignmentResult { course_id: id, changed }))
}

async fn assign_class(
    State(state): State<AppState>,
    actor: Identity,
    Path((id, class_id)): Path<(String, String)>,
) -> Result<Json<FanoutResult>, AppError> {
    let result = state.fanout.assign_course_to_class(&actor, &id, &class_id).await?;
    Ok(Json(result))
}

async fn reconcile_course(
    State(state): State<AppState>,
    actor: Identity,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let owner = course_owner(&state, &id).await?;
    authorize_owner(&actor, &owner)?;
    match state.engine.reconcile(&id).await? {
        Reconciled::Synced(view) => Ok(Json(view).into_response()),
        Reconciled::Deleted => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn create_class(
    State(state): State<AppState>,
    actor: Identity,
    Json(req): Json<NewClassRequest>,
) -> Result<Json<ClassView>, AppError> {
    let view = state.classes.create_class(&actor, req).await?;
    Ok(Json(view))
}

async fn get_class(
    State(state): State<AppState>,
    actor: Identity,
    Path(id): Path<String>,
) -> Result<Json<ClassView>, AppError> {
    let view = state.classes.get_class(&actor, &id).await?;
    Ok(Json(view))
}

async fn delete_class(
    State(state): State<AppState>,
    actor: Identity,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.classes.delete_class(&actor, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_student(
    State(state): State<AppState>,
    actor: Identity,
    Path(id): Path<String>,
    Json(req): Json<AddStudentRequest>,
) -> Result<Json<ClassView>, AppError> {
    let view = state.classes.add_student(&actor, &id, &req.student_id).await?;
    Ok(Json(view))
}

async fn remove_student(
    State(state): State<AppState>,
    actor: Identity,
    Path((id, student_id)): Path<(String, String)>,
) -> Result<Json<ClassView>, AppError> {
    let view = state.classes.remove_student(&actor, &id, &student_id).await?;
    Ok(Json(view))
}

async fn reconcile_class(
    State(state): State<AppState>,
    actor: Identity,
    Path(id): Path<String>,
) -> Result<Json<ClassView>, AppError> {
    let view = state.classes.reconcile_class(&actor, &id).await?;
    Ok(Json(view))
}

async fn sync_now(State(state): State<AppState>, actor: Identity) -> Result<Json<ReconcileStats>, AppError> {
    if actor.role != Role::Admin {
        return Err(AppError::Unauthorized("only admins may run the reconcile sweep".to_string()));
    }
    let stats = state.engine.reconcile_pending().await?;
    Ok(Json(stats))
}
