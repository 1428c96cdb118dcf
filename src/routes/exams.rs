use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::dto::exam_dto::{CreateExamRequest, ExamSummary};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ForceQuery {
    #[serde(default)]
    pub force: bool,
}

#[axum::debug_handler]
pub async fn create_exam(
    State(state): State<AppState>,
    Json(req): Json<CreateExamRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let exam = state.exam_service.create_exam(req).await?;
    Ok((StatusCode::CREATED, Json(exam)).into_response())
}

#[axum::debug_handler]
pub async fn list_exams(State(state): State<AppState>) -> crate::error::Result<Response> {
    let exams = state.exam_service.list_exams().await?;
    let summaries: Vec<ExamSummary> = exams.iter().map(ExamSummary::from).collect();
    Ok(Json(json!({ "exams": summaries })).into_response())
}

#[axum::debug_handler]
pub async fn get_exam(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let exam = state.exam_service.get_exam(id).await?;
    Ok(Json(exam).into_response())
}

#[axum::debug_handler]
pub async fn delete_exam(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> crate::error::Result<Response> {
    state.exam_service.delete_exam(id).await?;
    Ok(Json(json!({ "deleted": true })).into_response())
}

#[axum::debug_handler]
pub async fn get_exam_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<ForceQuery>,
) -> crate::error::Result<Response> {
    let analysis = state.exam_service.exam_analysis(id, q.force).await?;
    Ok(Json(analysis).into_response())
}
