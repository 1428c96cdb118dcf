use crate::models::question::Question;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Exam {
    pub id: Uuid,
    pub title: String,
    pub subject: String,
    pub grade_label: String,
    pub questions: JsonValue,
    pub total_score: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Exam {
    /// Deserialize the JSONB question snapshot. Rows written through the
    /// service layer always hold a valid list; a corrupt row yields an empty
    /// one rather than a panic.
    pub fn question_list(&self) -> Vec<Question> {
        serde_json::from_value(self.questions.clone()).unwrap_or_default()
    }
}
