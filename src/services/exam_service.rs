use crate::dto::exam_dto::CreateExamRequest;
use crate::error::{Error, Result};
use crate::models::exam::Exam;
use crate::models::question::{default_domain, Question};
use crate::services::analysis_service::{AnalysisService, ExamAnalysis};
use crate::services::artifact_service::{stage, ArtifactService};
use sqlx::PgPool;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Clone)]
pub struct ExamService {
    pool: PgPool,
    artifacts: ArtifactService,
}

impl ExamService {
    pub fn new(pool: PgPool) -> Self {
        let artifacts = ArtifactService::new(pool.clone());
        Self { pool, artifacts }
    }

    pub async fn create_exam(&self, payload: CreateExamRequest) -> Result<Exam> {
        if payload.questions.is_empty() {
            return Err(Error::BadRequest(
                "An exam must contain at least one question".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for q in &payload.questions {
            if !seen.insert(q.number) {
                return Err(Error::BadRequest(format!(
                    "Duplicate question number: {}",
                    q.number
                )));
            }
        }

        let questions: Vec<Question> = payload
            .questions
            .iter()
            .map(|q| Question {
                number: q.number,
                domain: q.domain.clone().unwrap_or_else(default_domain),
                difficulty: q.difficulty.unwrap_or_default(),
                subcategory: q.subcategory.clone(),
                answer: q.answer,
                points: q.points,
            })
            .collect();
        let total_score: i32 = questions.iter().map(|q| q.points).sum();

        let exam = sqlx::query_as::<_, Exam>(
            r#"
            INSERT INTO exams (id, title, subject, grade_label, questions, total_score)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&payload.title)
        .bind(&payload.subject)
        .bind(&payload.grade_label)
        .bind(serde_json::to_value(&questions)?)
        .bind(total_score)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(exam_id = %exam.id, title = %exam.title, "Exam created");
        Ok(exam)
    }

    pub async fn get_exam(&self, exam_id: Uuid) -> Result<Exam> {
        let exam = sqlx::query_as::<_, Exam>(r#"SELECT * FROM exams WHERE id = $1"#)
            .bind(exam_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Exam not found".to_string()))?;
        Ok(exam)
    }

    pub async fn list_exams(&self) -> Result<Vec<Exam>> {
        let exams = sqlx::query_as::<_, Exam>(r#"SELECT * FROM exams ORDER BY created_at DESC"#)
            .fetch_all(&self.pool)
            .await?;
        Ok(exams)
    }

    pub async fn delete_exam(&self, exam_id: Uuid) -> Result<()> {
        let result = sqlx::query(r#"DELETE FROM exams WHERE id = $1"#)
            .bind(exam_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("Exam not found".to_string()));
        }
        self.artifacts
            .invalidate(stage::EXAM_ANALYSIS, exam_id)
            .await?;
        Ok(())
    }

    /// Cached per-exam composition analysis (question counts and points by
    /// domain and difficulty).
    pub async fn exam_analysis(&self, exam_id: Uuid, force: bool) -> Result<ExamAnalysis> {
        let exam = self.get_exam(exam_id).await?;
        let questions = exam.question_list();
        let payload = self
            .artifacts
            .get_or_compute(stage::EXAM_ANALYSIS, exam_id, force, || {
                Ok(serde_json::to_value(AnalysisService::exam_analysis(
                    &questions,
                ))?)
            })
            .await?;
        Ok(serde_json::from_value(payload)?)
    }
}
