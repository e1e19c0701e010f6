pub mod dto;
pub mod firestore;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{ClassView, CourseView, MergeOp};

pub use firestore::{FirestoreClient, FirestoreConfig};
pub use memory::InMemoryProjection;

/// Denormalised, directly servable course document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseDocument {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub owner_id: String,
    pub subject: String,
    pub year_of_study: i32,
    pub is_active: bool,
    pub links: Vec<String>,
    pub attachment_urls: Vec<String>,
    pub assigned_users: Vec<String>,
    pub assigned_classes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CourseDocument {
    pub fn from_view(view: &CourseView) -> Self {
        let course = &view.course;
        Self {
            id: course.id.clone(),
            title: course.title.clone(),
            slug: course.slug.clone(),
            owner_id: course.owner_id.clone(),
            subject: course.subject.clone(),
            year_of_study: course.year_of_study,
            is_active: course.is_active,
            links: course.links.clone(),
            attachment_urls: course.attachment_urls.clone(),
            assigned_users: view.assigned_users.iter().cloned().collect(),
            assigned_classes: view.assigned_classes.iter().cloned().collect(),
            created_at: course.created_at,
            updated_at: course.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDocument {
    pub id: String,
    pub name: String,
    pub grade_level: i32,
    pub owner_id: String,
    pub students: Vec<String>,
    pub assigned_courses: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl ClassDocument {
    pub fn from_view(view: &ClassView) -> Self {
        Self {
            id: view.class.id.clone(),
            name: view.class.name.clone(),
            grade_level: view.class.grade_level,
            owner_id: view.class.owner_id.clone(),
            students: view.students.iter().cloned().collect(),
            assigned_courses: view.assigned_courses.iter().cloned().collect(),
            updated_at: view.class.updated_at,
        }
    }
}

/// Collection-valued course fields. These are only ever merged, never
/// replaced wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberField {
    AssignedUsers,
    AssignedClasses,
    Links,
    AttachmentUrls,
}

impl MemberField {
    pub fn field_path(&self) -> &'static str {
        match self {
            MemberField::AssignedUsers => "assignedUsers",
            MemberField::AssignedClasses => "assignedClasses",
            MemberField::Links => "links",
            MemberField::AttachmentUrls => "attachmentUrls",
        }
    }
}

#[async_trait]
pub trait ProjectionClient: Send + Sync {
    async fn fetch_course(&self, id: &str) -> Result<Option<CourseDocument>, AppError>;
    async fn list_courses(&self) -> Result<Vec<CourseDocument>, AppError>;
    /// Ids of the course documents currently carrying `slug`. More than one
    /// means the projection already holds a duplicate.
    async fn slug_owners(&self, slug: &str) -> Result<Vec<String>, AppError>;
    /// Overwrites scalar fields and unions every collection field. Creates the
    /// document when it does not exist.
    async fn merge_course(&self, doc: &CourseDocument) -> Result<(), AppError>;
    /// Adds or removes values of one collection field. Fails with `NotFound`
    /// when the document is missing.
    async fn merge_course_members(
        &self,
        course_id: &str,
        field: MemberField,
        values: &[String],
        op: MergeOp,
    ) -> Result<(), AppError>;
    async fn delete_course(&self, id: &str) -> Result<(), AppError>;
    async fn fetch_class(&self, id: &str) -> Result<Option<ClassDocument>, AppError>;
    async fn merge_class(&self, doc: &ClassDocument) -> Result<(), AppError>;
    async fn merge_class_students(&self, class_id: &str, values: &[String], op: MergeOp) -> Result<(), AppError>;
    /// Records the link on both documents in one atomic write.
    async fn link_course_class(&self, course_id: &str, class_id: &str) -> Result<(), AppError>;
    /// Drops `course_id` from the class document's `assignedCourses`. A missing
    /// class document is not an error.
    async fn unlink_course_from_class(&self, class_id: &str, course_id: &str) -> Result<(), AppError>;
    async fn delete_class(&self, id: &str) -> Result<(), AppError>;
    async fn health_check(&self) -> Result<(), AppError>;
}
