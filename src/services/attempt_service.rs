use crate::dto::attempt_dto::{AttemptListQuery, ManualGradeRequest, SubmitAnswersRequest};
use crate::error::{Error, Result};
use crate::models::attempt::{status, Attempt};
use crate::models::exam::Exam;
use crate::services::analysis_service::{AnalysisService, ScoreBreakdown};
use crate::services::artifact_service::{stage, ArtifactService};
use crate::services::grading_service::{GradingResult, GradingService};
use crate::utils::token::generate_access_token;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct AttemptService {
    pool: PgPool,
    artifacts: ArtifactService,
}

impl AttemptService {
    pub fn new(pool: PgPool) -> Self {
        let artifacts = ArtifactService::new(pool.clone());
        Self { pool, artifacts }
    }

    /// Hand an exam to a student. The returned access token is the student's
    /// key to the public take/results surface.
    pub async fn create_attempt(&self, exam_id: Uuid, student_id: Uuid) -> Result<Attempt> {
        // Both sides must exist; surface 404 rather than a FK error.
        sqlx::query(r#"SELECT 1 FROM exams WHERE id = $1"#)
            .bind(exam_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Exam not found".to_string()))?;
        sqlx::query(r#"SELECT 1 FROM students WHERE id = $1"#)
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Student not found".to_string()))?;

        let access_token = generate_access_token(32);
        let attempt = sqlx::query_as::<_, Attempt>(
            r#"
            INSERT INTO attempts (id, exam_id, student_id, access_token, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(exam_id)
        .bind(student_id)
        .bind(&access_token)
        .bind(status::NOT_STARTED)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(attempt_id = %attempt.id, exam_id = %exam_id, "Attempt created");
        Ok(attempt)
    }

    pub async fn get_attempt_by_id(&self, attempt_id: Uuid) -> Result<Attempt> {
        let attempt = sqlx::query_as::<_, Attempt>(r#"SELECT * FROM attempts WHERE id = $1"#)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Attempt not found".to_string()))?;
        Ok(attempt)
    }

    pub async fn get_attempt_and_exam_by_token(&self, token: &str) -> Result<(Attempt, Exam)> {
        let attempt =
            sqlx::query_as::<_, Attempt>(r#"SELECT * FROM attempts WHERE access_token = $1"#)
                .bind(token)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| Error::NotFound("Attempt not found".to_string()))?;

        let exam = sqlx::query_as::<_, Exam>(r#"SELECT * FROM exams WHERE id = $1"#)
            .bind(attempt.exam_id)
            .fetch_one(&self.pool)
            .await?;

        Ok((attempt, exam))
    }

    pub async fn list_attempts(&self, query: &AttemptListQuery) -> Result<(Vec<Attempt>, i64)> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * limit;

        let rows = sqlx::query_as::<_, Attempt>(
            r#"
            SELECT * FROM attempts
            WHERE ($1::uuid IS NULL OR exam_id = $1)
              AND ($2::uuid IS NULL OR student_id = $2)
              AND ($3::text IS NULL OR status = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(query.exam_id)
        .bind(query.student_id)
        .bind(&query.status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM attempts
            WHERE ($1::uuid IS NULL OR exam_id = $1)
              AND ($2::uuid IS NULL OR student_id = $2)
              AND ($3::text IS NULL OR status = $3)
            "#,
        )
        .bind(query.exam_id)
        .bind(query.student_id)
        .bind(&query.status)
        .fetch_one(&self.pool)
        .await?;

        Ok((rows, total))
    }

    pub async fn start_attempt_by_token(&self, token: &str) -> Result<Attempt> {
        let (attempt, _exam) = self.get_attempt_and_exam_by_token(token).await?;
        if attempt.status != status::NOT_STARTED && attempt.status != status::IN_PROGRESS {
            return Err(Error::Conflict(
                "Attempt has already been submitted".to_string(),
            ));
        }

        let updated = sqlx::query_as::<_, Attempt>(
            r#"
            UPDATE attempts
            SET status = $1, started_at = COALESCE(started_at, $2), updated_at = NOW()
            WHERE access_token = $3
            RETURNING *
            "#,
        )
        .bind(status::IN_PROGRESS)
        .bind(Utc::now())
        .bind(token)
        .fetch_one(&self.pool)
        .await?;

        Ok(updated)
    }

    /// Submit the answer map and grade it synchronously. Double submits are
    /// rejected with a conflict; the first grading result stands.
    pub async fn submit_attempt_by_token(
        &self,
        token: &str,
        req: SubmitAnswersRequest,
    ) -> Result<(Attempt, GradingResult)> {
        let (attempt, exam) = self.get_attempt_and_exam_by_token(token).await?;

        if attempt.status == status::SUBMITTED || attempt.status == status::GRADED {
            return Err(Error::Conflict(
                "Attempt has already been submitted".to_string(),
            ));
        }
        if !req.answers.is_object() {
            return Err(Error::BadRequest(
                "Answers must be a map of question number to submitted value".to_string(),
            ));
        }

        let questions = exam.question_list();
        let result = GradingService::grade(&questions, &req.answers);

        let updated = self
            .persist_grading(attempt.id, &req.answers, &result)
            .await?;

        tracing::info!(
            attempt_id = %updated.id,
            score = result.score,
            max_score = result.max_score,
            grade = result.grade,
            "Attempt graded"
        );
        Ok((updated, result))
    }

    /// Staff manual grading override: mark individual questions as
    /// "correct"/"wrong" and regrade. Invalidates the cached per-attempt
    /// artifacts since the numbers changed; an existing report is left alone
    /// (explicit delete-then-regenerate is the only report update path).
    pub async fn apply_manual_grades(
        &self,
        attempt_id: Uuid,
        req: ManualGradeRequest,
    ) -> Result<(Attempt, GradingResult)> {
        let attempt = self.get_attempt_by_id(attempt_id).await?;
        if attempt.status != status::SUBMITTED && attempt.status != status::GRADED {
            return Err(Error::BadRequest(
                "Attempt has not been submitted yet".to_string(),
            ));
        }

        let exam = sqlx::query_as::<_, Exam>(r#"SELECT * FROM exams WHERE id = $1"#)
            .bind(attempt.exam_id)
            .fetch_one(&self.pool)
            .await?;
        let questions = exam.question_list();

        let mut answers = attempt
            .answers
            .clone()
            .unwrap_or_else(|| serde_json::json!({}));
        let map = answers
            .as_object_mut()
            .ok_or_else(|| Error::Internal("Attempt answers are not a map".to_string()))?;

        for (number, mark) in &req.marks {
            if mark != "correct" && mark != "wrong" {
                return Err(Error::BadRequest(format!(
                    "Invalid mark '{}' for question {}; expected \"correct\" or \"wrong\"",
                    mark, number
                )));
            }
            let parsed: i32 = number.parse().map_err(|_| {
                Error::BadRequest(format!("Invalid question number: {}", number))
            })?;
            if !questions.iter().any(|q| q.number == parsed) {
                return Err(Error::NotFound(format!(
                    "Question {} does not exist in this exam",
                    parsed
                )));
            }
            map.insert(number.clone(), JsonValue::String(mark.clone()));
        }

        let result = GradingService::grade(&questions, &answers);
        let updated = self.persist_grading(attempt_id, &answers, &result).await?;

        // Grading changed; the cached derivations are stale.
        self.artifacts
            .invalidate(stage::SCORE_BREAKDOWN, attempt_id)
            .await?;
        self.artifacts
            .invalidate(stage::AI_ANALYSIS, attempt_id)
            .await?;

        Ok((updated, result))
    }

    /// Cached domain/difficulty aggregation for a graded attempt.
    pub async fn score_breakdown(&self, attempt_id: Uuid, force: bool) -> Result<ScoreBreakdown> {
        let attempt = self.get_attempt_by_id(attempt_id).await?;
        if !attempt.is_graded() {
            return Err(Error::BadRequest(
                "Attempt has not been submitted and graded yet".to_string(),
            ));
        }

        let exam = sqlx::query_as::<_, Exam>(r#"SELECT * FROM exams WHERE id = $1"#)
            .bind(attempt.exam_id)
            .fetch_one(&self.pool)
            .await?;
        let questions = exam.question_list();
        let answers = attempt.answers.unwrap_or_else(|| serde_json::json!({}));

        let payload = self
            .artifacts
            .get_or_compute(stage::SCORE_BREAKDOWN, attempt_id, force, || {
                Ok(serde_json::to_value(AnalysisService::breakdown(
                    &questions, &answers,
                ))?)
            })
            .await?;
        Ok(serde_json::from_value(payload)?)
    }

    async fn persist_grading(
        &self,
        attempt_id: Uuid,
        answers: &JsonValue,
        result: &GradingResult,
    ) -> Result<Attempt> {
        let updated = sqlx::query_as::<_, Attempt>(
            r#"
            UPDATE attempts
            SET answers = $1, score = $2, max_score = $3, correct_count = $4, grade = $5,
                status = $6, submitted_at = COALESCE(submitted_at, $7), updated_at = NOW()
            WHERE id = $8
            RETURNING *
            "#,
        )
        .bind(answers)
        .bind(result.score)
        .bind(result.max_score)
        .bind(result.correct_count)
        .bind(result.grade)
        .bind(status::GRADED)
        .bind(Utc::now())
        .bind(attempt_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(updated)
    }
}
