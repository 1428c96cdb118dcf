use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::dto::attempt_dto::{
    AttemptListQuery, CreateAttemptRequest, CreateAttemptResponse, ManualGradeRequest,
};
use crate::routes::exams::ForceQuery;
use crate::AppState;

#[axum::debug_handler]
pub async fn create_attempt(
    State(state): State<AppState>,
    Json(req): Json<CreateAttemptRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let attempt = state
        .attempt_service
        .create_attempt(req.exam_id, req.student_id)
        .await?;
    let resp = CreateAttemptResponse {
        attempt_id: attempt.id,
        access_token: attempt.access_token,
        status: attempt.status,
    };
    Ok((StatusCode::CREATED, Json(resp)).into_response())
}

#[axum::debug_handler]
pub async fn list_attempts(
    State(state): State<AppState>,
    Query(query): Query<AttemptListQuery>,
) -> crate::error::Result<Response> {
    let (attempts, total) = state.attempt_service.list_attempts(&query).await?;
    Ok(Json(json!({ "attempts": attempts, "total": total })).into_response())
}

#[axum::debug_handler]
pub async fn get_attempt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let attempt = state.attempt_service.get_attempt_by_id(id).await?;
    Ok(Json(attempt).into_response())
}

#[axum::debug_handler]
pub async fn manual_grade(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ManualGradeRequest>,
) -> crate::error::Result<Response> {
    if req.marks.is_empty() {
        return Err(crate::error::Error::BadRequest(
            "No marks provided".to_string(),
        ));
    }
    let (attempt, result) = state.attempt_service.apply_manual_grades(id, req).await?;
    Ok(Json(json!({
        "attempt_id": attempt.id,
        "status": attempt.status,
        "score": result.score,
        "max_score": result.max_score,
        "correct_count": result.correct_count,
        "grade": result.grade,
    }))
    .into_response())
}

#[axum::debug_handler]
pub async fn get_breakdown(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<ForceQuery>,
) -> crate::error::Result<Response> {
    let breakdown = state.attempt_service.score_breakdown(id, q.force).await?;
    Ok(Json(breakdown).into_response())
}
