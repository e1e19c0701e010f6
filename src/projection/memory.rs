use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ClassDocument, CourseDocument, MemberField, ProjectionClient};
use crate::error::AppError;
use crate::models::{MergeOp, union_ordered};

#[derive(Default)]
struct Documents {
    courses: HashMap<String, CourseDocument>,
    classes: HashMap<String, ClassDocument>,
}

/// Process-local projection with the same merge semantics as Firestore.
/// Every operation runs under one lock, so each call is atomic.
#[derive(Default)]
pub struct InMemoryProjection {
    docs: Mutex<Documents>,
}

impl InMemoryProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a course document as-is, bypassing merge rules. This is what a
    /// projection-first client does when it writes the document store directly.
    pub async fn put_course(&self, doc: CourseDocument) {
        self.docs.lock().await.courses.insert(doc.id.clone(), doc);
    }

    pub async fn put_class(&self, doc: ClassDocument) {
        self.docs.lock().await.classes.insert(doc.id.clone(), doc);
    }
}

fn apply(target: &mut Vec<String>, values: &[String], op: MergeOp) {
    match op {
        MergeOp::Add => *target = union_ordered(target, values),
        MergeOp::Remove => target.retain(|v| !values.contains(v)),
    }
}

#[async_trait]
impl ProjectionClient for InMemoryProjection {
    async fn fetch_course(&self, id: &str) -> Result<Option<CourseDocument>, AppError> {
        Ok(self.docs.lock().await.courses.get(id).cloned())
    }

    async fn list_courses(&self) -> Result<Vec<CourseDocument>, AppError> {
        let docs = self.docs.lock().await;
        let mut courses: Vec<CourseDocument> = docs.courses.values().cloned().collect();
        courses.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(courses)
    }

    async fn slug_owners(&self, slug: &str) -> Result<Vec<String>, AppError> {
        let docs = self.docs.lock().await;
        Ok(docs
            .courses
            .values()
            .filter(|doc| doc.slug == slug)
            .map(|doc| doc.id.clone())
            .collect())
    }

    async fn merge_course(&self, doc: &CourseDocument) -> Result<(), AppError> {
        let mut docs = self.docs.lock().await;
        match docs.courses.get_mut(&doc.id) {
            Some(existing) => {
                existing.title = doc.title.clone();
                existing.slug = doc.slug.clone();
                existing.owner_id = doc.owner_id.clone();
                existing.subject = doc.subject.clone();
                existing.year_of_study = doc.year_of_study;
                existing.is_active = doc.is_active;
                existing.updated_at = doc.updated_at;
                apply(&mut existing.links, &doc.links, MergeOp::Add);
                apply(&mut existing.attachment_urls, &doc.attachment_urls, MergeOp::Add);
                apply(&mut existing.assigned_users, &doc.assigned_users, MergeOp::Add);
                apply(&mut existing.assigned_classes, &doc.assigned_classes, MergeOp::Add);
            }
            None => {
                docs.courses.insert(doc.id.clone(), doc.clone());
            }
        }
        Ok(())
    }

    async fn merge_course_members(
        &self,
        course_id: &str,
        field: MemberField,
        values: &[String],
        op: MergeOp,
    ) -> Result<(), AppError> {
        let mut docs = self.docs.lock().await;
        let doc = docs
            .courses
            .get_mut(course_id)
            .ok_or_else(|| AppError::not_found("course document", course_id))?;
        let target = match field {
            MemberField::AssignedUsers => &mut doc.assigned_users,
            MemberField::AssignedClasses => &mut doc.assigned_classes,
            MemberField::Links => &mut doc.links,
            MemberField::AttachmentUrls => &mut doc.attachment_urls,
        };
        apply(target, values, op);
        Ok(())
    }

    async fn delete_course(&self, id: &str) -> Result<(), AppError> {
        self.docs.lock().await.courses.remove(id);
        Ok(())
    }

    async fn fetch_class(&self, id: &str) -> Result<Option<ClassDocument>, AppError> {
        Ok(self.docs.lock().await.classes.get(id).cloned())
    }

    async fn merge_class(&self, doc: &ClassDocument) -> Result<(), AppError> {
        let mut docs = self.docs.lock().await;
        match docs.classes.get_mut(&doc.id) {
            Some(existing) => {
                existing.name = doc.name.clone();
                existing.grade_level = doc.grade_level;
                existing.owner_id = doc.owner_id.clone();
                existing.updated_at = doc.updated_at;
                apply(&mut existing.students, &doc.students, MergeOp::Add);
                apply(&mut existing.assigned_courses, &doc.assigned_courses, MergeOp::Add);
            }
            None => {
                docs.classes.insert(doc.id.clone(), doc.clone());
            }
        }
        Ok(())
    }

    async fn merge_class_students(&self, class_id: &str, values: &[String], op: MergeOp) -> Result<(), AppError> {
        let mut docs = self.docs.lock().await;
        let doc = docs
            .classes
            .get_mut(class_id)
            .ok_or_else(|| AppError::not_found("class document", class_id))?;
        apply(&mut doc.students, values, op);
        Ok(())
    }

    async fn link_course_class(&self, course_id: &str, class_id: &str) -> Result<(), AppError> {
        let mut docs = self.docs.lock().await;
        if !docs.classes.contains_key(class_id) {
            return Err(AppError::not_found("class document", class_id));
        }
        let course = docs
            .courses
            .get_mut(course_id)
            .ok_or_else(|| AppError::not_found("course document", course_id))?;
        apply(&mut course.assigned_classes, &[class_id.to_string()], MergeOp::Add);

        if let Some(class) = docs.classes.get_mut(class_id) {
            apply(&mut class.assigned_courses, &[course_id.to_string()], MergeOp::Add);
        }
        Ok(())
    }

    async fn unlink_course_from_class(&self, class_id: &str, course_id: &str) -> Result<(), AppError> {
        if let Some(class) = self.docs.lock().await.classes.get_mut(class_id) {
            apply(&mut class.assigned_courses, &[course_id.to_string()], MergeOp::Remove);
        }
        Ok(())
    }

    async fn delete_class(&self, id: &str) -> Result<(), AppError> {
        self.docs.lock().await.classes.remove(id);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}
