use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json, Response},
};

use crate::dto::attempt_dto::{SubmitAnswersRequest, SubmitAnswersResponse};
use crate::dto::public_dto::{PublicQuestion, ResultsResponse, TakeExamResponse};
use crate::AppState;

/// Exam payload for the student taking an attempt. Answer keys and points
/// never leave the server.
#[axum::debug_handler]
pub async fn get_exam_by_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> crate::error::Result<Response> {
    let (attempt, exam) = state
        .attempt_service
        .get_attempt_and_exam_by_token(&token)
        .await?;

    let questions = exam.question_list();
    let response = TakeExamResponse {
        exam_title: exam.title,
        subject: exam.subject,
        grade_label: exam.grade_label,
        total_questions: questions.len(),
        questions: questions
            .iter()
            .map(|q| PublicQuestion {
                number: q.number,
                domain: q.domain.clone(),
                difficulty: q.difficulty,
            })
            .collect(),
        attempt_status: attempt.status,
    };
    Ok(Json(response).into_response())
}

#[axum::debug_handler]
pub async fn start_attempt(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> crate::error::Result<Response> {
    let attempt = state.attempt_service.start_attempt_by_token(&token).await?;
    Ok(Json(serde_json::json!({
        "attempt_id": attempt.id,
        "status": attempt.status,
        "started_at": attempt.started_at,
    }))
    .into_response())
}

#[axum::debug_handler]
pub async fn submit_attempt(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<SubmitAnswersRequest>,
) -> crate::error::Result<Response> {
    let (attempt, result) = state
        .attempt_service
        .submit_attempt_by_token(&token, req)
        .await?;

    let resp = SubmitAnswersResponse {
        attempt_id: attempt.id,
        status: attempt.status,
        score: result.score,
        max_score: result.max_score,
        correct_count: result.correct_count,
        grade: result.grade,
    };
    Ok(Json(resp).into_response())
}

/// Parent/student result view: grading numbers, the cached breakdown, and
/// the report HTML when one has been generated.
#[axum::debug_handler]
pub async fn get_results(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> crate::error::Result<Response> {
    let (attempt, exam) = state
        .attempt_service
        .get_attempt_and_exam_by_token(&token)
        .await?;

    let student = state
        .student_service
        .get_student(attempt.student_id)
        .await?;

    let (breakdown, report_html) = if attempt.is_graded() {
        let breakdown = state
            .attempt_service
            .score_breakdown(attempt.id, false)
            .await?;
        let report = state.report_service.find_report(attempt.id).await?;
        (
            Some(serde_json::to_value(breakdown)?),
            report.map(|r| r.html),
        )
    } else {
        (None, None)
    };

    let resp = ResultsResponse {
        exam_title: exam.title,
        student_name: student.name,
        status: attempt.status,
        score: attempt.score,
        max_score: attempt.max_score,
        correct_count: attempt.correct_count,
        grade: attempt.grade,
        breakdown,
        report_html,
    };
    Ok(Json(resp).into_response())
}
