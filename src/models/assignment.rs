use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CourseAssignment {
    pub course_id: String,
    pub student_id: String,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOp {
    Add,
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRequest {
    pub subject_ids: BTreeSet<String>,
    #[serde(default = "default_op")]
    pub op: MergeOp,
}

fn default_op() -> MergeOp {
    MergeOp::Add
}

/// Per-course bookkeeping of what has been propagated between the two stores.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct SyncRecord {
    pub course_id: String,
    /// `updated_at` of the newest applied upsert, in microseconds.
    pub source_version: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub pending_store: Option<String>,
    pub pending_op: Option<String>,
    pub updated_at: DateTime<Utc>,
}
