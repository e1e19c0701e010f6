use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Canonical course row as held by the CourseStore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub owner_id: String,
    pub subject: String,
    pub year_of_study: i32,
    pub is_active: bool,
    pub links: Vec<String>,
    pub attachment_urls: Vec<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub(crate) struct CourseRow {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub owner_id: String,
    pub subject: String,
    pub year_of_study: i32,
    pub is_active: bool,
    pub links: Json<Vec<String>>,
    pub attachment_urls: Json<Vec<String>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CourseRow> for Course {
    fn from(row: CourseRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            slug: row.slug,
            owner_id: row.owner_id,
            subject: row.subject,
            year_of_study: row.year_of_study,
            is_active: row.is_active,
            links: row.links.0,
            attachment_urls: row.attachment_urls.0,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// A course together with its membership, as CourseStore sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseView {
    #[serde(flatten)]
    pub course: Course,
    pub assigned_users: BTreeSet<String>,
    pub assigned_classes: BTreeSet<String>,
}

/// Payload accepted by `SyncEngine::upsert` from either write path.
///
/// Scalars overwrite the target store, collections are unioned into it.
/// `slug` is only honoured when the course does not exist yet; an existing
/// slug changes only when `regenerate_slug` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseUpsert {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub regenerate_slug: bool,
    pub owner_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub year_of_study: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub attachment_urls: Vec<String>,
    #[serde(default)]
    pub assigned_users: BTreeSet<String>,
    #[serde(default)]
    pub assigned_classes: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl CourseUpsert {
    /// Builds an upsert carrying the current scalar state of a stored course.
    pub fn from_course(course: &Course) -> Self {
        Self {
            id: course.id.clone(),
            title: course.title.clone(),
            slug: Some(course.slug.clone()),
            regenerate_slug: false,
            owner_id: course.owner_id.clone(),
            subject: course.subject.clone(),
            year_of_study: course.year_of_study,
            is_active: course.is_active,
            links: course.links.clone(),
            attachment_urls: course.attachment_urls.clone(),
            assigned_users: BTreeSet::new(),
            assigned_classes: BTreeSet::new(),
            updated_at: course.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCourseRequest {
    pub title: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub year_of_study: i32,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub attachment_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCourseRequest {
    pub title: Option<String>,
    pub subject: Option<String>,
    pub year_of_study: Option<i32>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub attachment_urls: Vec<String>,
    #[serde(default)]
    pub regenerate_slug: bool,
}

/// Appends the items of `incoming` that `current` lacks, keeping order.
pub fn union_ordered(current: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged = current.to_vec();
    for item in incoming {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_keeps_existing_order_and_skips_duplicates() {
        let current = vec!["a".to_string(), "b".to_string()];
        let incoming = vec!["b".to_string(), "c".to_string(), "a".to_string()];
        assert_eq!(union_ordered(&current, &incoming), vec!["a", "b", "c"]);
    }

    #[test]
    fn upsert_payload_defaults_to_active() {
        let payload: CourseUpsert = serde_json::from_value(serde_json::json!({
            "id": "c1",
            "title": "Fizyka",
            "owner_id": "t1",
            "updated_at": "2026-01-10T10:00:00Z"
        }))
        .unwrap();
        assert!(payload.is_active);
        assert!(payload.links.is_empty());
        assert!(payload.slug.is_none());
    }
}
