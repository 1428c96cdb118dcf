use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

/// One student's submission record for one exam.
///
/// `answers` is a JSONB map from question number (as string key) to the raw
/// submitted value; see `AnswerValue` for the accepted shapes. Grading fields
/// stay NULL until the attempt is submitted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attempt {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub student_id: Uuid,
    pub access_token: String,
    pub answers: Option<JsonValue>,
    pub score: Option<i32>,
    pub max_score: Option<i32>,
    pub correct_count: Option<i32>,
    pub grade: Option<i32>,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub mod status {
    pub const NOT_STARTED: &str = "not_started";
    pub const IN_PROGRESS: &str = "in_progress";
    pub const SUBMITTED: &str = "submitted";
    pub const GRADED: &str = "graded";
}

impl Attempt {
    pub fn is_graded(&self) -> bool {
        self.status == status::GRADED
    }
}
