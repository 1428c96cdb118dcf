use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateExamRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 100))]
    pub subject: String,
    #[validate(length(min = 1, max = 50))]
    pub grade_label: String,
    #[validate(nested)]
    pub questions: Vec<QuestionPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QuestionPayload {
    #[validate(range(min = 1))]
    pub number: i32,
    pub domain: Option<String>,
    pub difficulty: Option<crate::models::question::Difficulty>,
    pub subcategory: Option<String>,
    #[validate(range(min = 1, max = 5))]
    pub answer: i32,
    #[validate(range(min = 1))]
    pub points: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSummary {
    pub id: uuid::Uuid,
    pub title: String,
    pub subject: String,
    pub grade_label: String,
    pub total_questions: usize,
    pub total_score: i32,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&crate::models::exam::Exam> for ExamSummary {
    fn from(exam: &crate::models::exam::Exam) -> Self {
        Self {
            id: exam.id,
            title: exam.title.clone(),
            subject: exam.subject.clone(),
            grade_label: exam.grade_label.clone(),
            total_questions: exam.question_list().len(),
            total_score: exam.total_score,
            created_at: exam.created_at,
        }
    }
}
