pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use crate::services::{
    ai_service::AiService, attempt_service::AttemptService, exam_service::ExamService,
    report_service::ReportService, student_service::StudentService,
};
use reqwest::Client;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub exam_service: ExamService,
    pub student_service: StudentService,
    pub attempt_service: AttemptService,
    pub report_service: ReportService,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let config = crate::config::get_config();
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(150))
            .build()
            .expect("failed to build HTTP client");

        let ai_service = Arc::new(AiService::new(
            config.gemini_api_key.clone(),
            config.openai_api_key.clone(),
            http_client,
        ));

        let exam_service = ExamService::new(pool.clone());
        let student_service = StudentService::new(pool.clone());
        let attempt_service = AttemptService::new(pool.clone());
        let report_service = ReportService::new(pool.clone(), ai_service);

        Self {
            pool,
            exam_service,
            student_service,
            attempt_service,
            report_service,
        }
    }
}
