use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAttemptRequest {
    pub exam_id: uuid::Uuid,
    pub student_id: uuid::Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAttemptResponse {
    pub attempt_id: uuid::Uuid,
    pub access_token: String,
    pub status: String,
}

/// Answer map: question number (string key) to raw submitted value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAnswersRequest {
    pub answers: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAnswersResponse {
    pub attempt_id: uuid::Uuid,
    pub status: String,
    pub score: i32,
    pub max_score: i32,
    pub correct_count: i32,
    pub grade: i32,
}

/// Staff manual grading: question number to "correct"/"wrong".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualGradeRequest {
    pub marks: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptListQuery {
    pub exam_id: Option<uuid::Uuid>,
    pub student_id: Option<uuid::Uuid>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}
