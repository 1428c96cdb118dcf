use axum::{
    routing::{get, post},
    Router,
};
use academy_backend::{
    config::{get_config, init_config},
    database::pool::create_pool,
    routes, AppState,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    init_config()?;
    let config = get_config();

    let pool = create_pool().await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let app_state = AppState::new(pool);

    let base_routes = Router::new().route("/health", get(routes::health::health));

    let management_api = Router::new()
        .route(
            "/api/exams",
            get(routes::exams::list_exams).post(routes::exams::create_exam),
        )
        .route(
            "/api/exams/:id",
            get(routes::exams::get_exam).delete(routes::exams::delete_exam),
        )
        .route(
            "/api/exams/:id/analysis",
            get(routes::exams::get_exam_analysis),
        )
        .route(
            "/api/students",
            get(routes::students::list_students).post(routes::students::create_student),
        )
        .route(
            "/api/students/:id",
            get(routes::students::get_student).delete(routes::students::delete_student),
        )
        .route(
            "/api/attempts",
            get(routes::attempts::list_attempts).post(routes::attempts::create_attempt),
        )
        .route("/api/attempts/:id", get(routes::attempts::get_attempt))
        .route(
            "/api/attempts/:id/grade",
            post(routes::attempts::manual_grade),
        )
        .route(
            "/api/attempts/:id/breakdown",
            get(routes::attempts::get_breakdown),
        )
        .route(
            "/api/attempts/:id/report",
            post(routes::reports::generate_report)
                .get(routes::reports::get_report)
                .delete(routes::reports::delete_report),
        )
        .route(
            "/api/attempts/:id/report/html",
            get(routes::reports::get_report_html),
        )
        .layer(axum::middleware::from_fn_with_state(
            academy_backend::middleware::rate_limit::new_rps_state(config.management_rps),
            academy_backend::middleware::rate_limit::rps_middleware,
        ));

    let public_api = Router::new()
        .route("/api/take/:token", get(routes::public::get_exam_by_token))
        .route("/api/take/:token/start", post(routes::public::start_attempt))
        .route(
            "/api/take/:token/submit",
            post(routes::public::submit_attempt),
        )
        .route("/api/results/:token", get(routes::public::get_results))
        .layer(axum::middleware::from_fn_with_state(
            academy_backend::middleware::rate_limit::new_rps_state(config.public_rps),
            academy_backend::middleware::rate_limit::rps_middleware,
        ));

    let app = base_routes
        .merge(management_api)
        .merge(public_api)
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
