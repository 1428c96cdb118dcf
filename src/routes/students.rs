use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::dto::student_dto::CreateStudentRequest;
use crate::AppState;

#[axum::debug_handler]
pub async fn create_student(
    State(state): State<AppState>,
    Json(req): Json<CreateStudentRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let student = state.student_service.create_student(req).await?;
    Ok((StatusCode::CREATED, Json(student)).into_response())
}

#[axum::debug_handler]
pub async fn list_students(State(state): State<AppState>) -> crate::error::Result<Response> {
    let students = state.student_service.list_students().await?;
    Ok(Json(json!({ "students": students })).into_response())
}

#[axum::debug_handler]
pub async fn get_student(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let student = state.student_service.get_student(id).await?;
    Ok(Json(student).into_response())
}

#[axum::debug_handler]
pub async fn delete_student(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> crate::error::Result<Response> {
    state.student_service.delete_student(id).await?;
    Ok(Json(json!({ "deleted": true })).into_response())
}
