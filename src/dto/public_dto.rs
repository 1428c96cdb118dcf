use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Exam payload handed to a student through an access token. Answer keys and
/// point values stay server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeExamResponse {
    pub exam_title: String,
    pub subject: String,
    pub grade_label: String,
    pub total_questions: usize,
    pub questions: Vec<PublicQuestion>,
    pub attempt_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub number: i32,
    pub domain: String,
    pub difficulty: crate::models::question::Difficulty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub exam_title: String,
    pub student_name: String,
    pub status: String,
    pub score: Option<i32>,
    pub max_score: Option<i32>,
    pub correct_count: Option<i32>,
    pub grade: Option<i32>,
    pub breakdown: Option<JsonValue>,
    pub report_html: Option<String>,
}
