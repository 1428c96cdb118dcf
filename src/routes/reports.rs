use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use uuid::Uuid;

use crate::routes::exams::ForceQuery;
use crate::services::report_service::ReportOutcome;
use crate::AppState;

#[axum::debug_handler]
pub async fn generate_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<ForceQuery>,
) -> crate::error::Result<Response> {
    let (status, report) = match state.report_service.generate_report(id, q.force).await? {
        ReportOutcome::Created(report) => (StatusCode::CREATED, report),
        ReportOutcome::Existing(report) => (StatusCode::OK, report),
    };
    Ok((status, Json(report)).into_response())
}

#[axum::debug_handler]
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let report = state.report_service.get_report(id).await?;
    Ok(Json(report).into_response())
}

#[axum::debug_handler]
pub async fn get_report_html(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let report = state.report_service.get_report(id).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        report.html,
    )
        .into_response())
}

#[axum::debug_handler]
pub async fn delete_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> crate::error::Result<Response> {
    state.report_service.delete_report(id).await?;
    Ok(Json(json!({ "deleted": true })).into_response())
}
