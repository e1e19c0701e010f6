use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ClassGroup {
    pub id: String,
    pub name: String,
    pub grade_level: i32,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassView {
    #[serde(flatten)]
    pub class: ClassGroup,
    pub students: BTreeSet<String>,
    pub assigned_courses: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClassRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub grade_level: i32,
    #[serde(default)]
    pub students: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddStudentRequest {
    pub student_id: String,
}

/// Outcome of one class-to-course fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanoutResult {
    pub course_id: String,
    pub class_id: String,
    pub students_added: usize,
}
