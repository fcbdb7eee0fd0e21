// src/main.rs

use std::env;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

use servicedesk_api::engine::Engine;
use servicedesk_api::notify::{GatewaySender, NoopSender, PushSender};
use servicedesk_api::storage::HttpObjectStorage;
use servicedesk_api::store::postgres::PgStore;
use servicedesk_api::{db, routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Initialize DB pool
    let pool = db::connect().await?;
    let store = Arc::new(PgStore::new(pool));

    let sender: Arc<dyn PushSender> = match env::var("PUSH_GATEWAY_URL") {
        Ok(url) => Arc::new(GatewaySender::new(url)),
        Err(_) => {
            tracing::warn!("PUSH_GATEWAY_URL not set, push notifications disabled");
            Arc::new(NoopSender)
        }
    };

    let storage_url = env::var("STORAGE_SERVICE_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:9000".to_string());
    let files = Arc::new(HttpObjectStorage::new(storage_url));
    let bucket = env::var("STORAGE_BUCKET").unwrap_or_else(|_| "servicedesk-issues".to_string());

    let engine = Engine::new(store, sender, files, bucket);
    let state = AppState { engine };

    // Very permissive CORS for local dev (tighten for prod)
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Root API router
    let api = Router::new()
        // health
        .route("/health", get(routes::health::health))
        // issues
        .route(
            "/api/v1/issues",
            post(routes::issues::create_issue).get(routes::issues::list_customer_issues),
        )
        .route("/api/v1/issues/:id", get(routes::issues::get_issue))
        .route(
            "/api/v1/heads/:head_id/issues",
            get(routes::issues::list_head_issues),
        )
        // lifecycle
        .route(
            "/api/v1/issues/:id/assign",
            post(routes::assignments::assign_issue),
        )
        .route(
            "/api/v1/issues/:id/start",
            post(routes::assignments::start_work),
        )
        .route(
            "/api/v1/issues/:id/resolve",
            post(routes::assignments::resolve_issue),
        )
        .route(
            "/api/v1/issues/:id/invalid",
            post(routes::assignments::invalidate_issue),
        )
        .route(
            "/api/v1/issues/:id/comments",
            post(routes::assignments::add_comment),
        )
        // site visits
        .route(
            "/api/v1/issues/:id/visit-requests",
            post(routes::visits::request_visit),
        )
        .route(
            "/api/v1/visit-requests/:id/reject",
            post(routes::visits::reject_request),
        )
        .route(
            "/api/v1/issues/:id/visits",
            post(routes::visits::schedule_visit),
        )
        .route(
            "/api/v1/visits/:id/complete",
            post(routes::visits::complete_visit),
        )
        .route(
            "/api/v1/visits/:id/cancel",
            post(routes::visits::cancel_visit),
        )
        // attachments
        .route(
            "/api/v1/attachments/presign-uploads",
            post(routes::attachments::presign_uploads),
        )
        .route(
            "/api/v1/issues/:id/attachments/request",
            post(routes::attachments::request_attachments),
        )
        .route(
            "/api/v1/issues/:id/attachments/confirm",
            post(routes::attachments::confirm_attachments),
        )
        .route(
            "/api/v1/attachments/download-url",
            get(routes::attachments::download_url),
        )
        // device tokens
        .route(
            "/api/v1/device-tokens",
            post(routes::devices::upsert_device_token),
        )
        // reports
        .route(
            "/api/v1/reports/heads/:head_id",
            get(routes::reports::head_report),
        )
        .route(
            "/api/v1/reports/manager",
            get(routes::reports::manager_report),
        )
        // state & middleware
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Port (axum 0.7 style)
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080); // default 8080

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("API listening on http://127.0.0.1:{port}");

    axum::serve(listener, api.into_make_service()).await?;
    Ok(())
}
