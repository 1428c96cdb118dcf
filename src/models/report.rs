use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

/// Final analysis report, one-to-one with a graded attempt (UNIQUE on
/// attempt_id). Regeneration requires deleting the row first.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Report {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub summary: String,
    pub weak_domains: JsonValue,
    pub recommendations: JsonValue,
    pub predicted_grade: i32,
    pub content: JsonValue,
    pub html: String,
    pub created_at: Option<DateTime<Utc>>,
}
