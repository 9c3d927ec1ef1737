use std::sync::Arc;

use axum::{routing::get, routing::post, Router};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use support_widget::agent::OllamaResponder;
use support_widget::db::{PgMessageRepository, PgSessionRepository};
use support_widget::realtime::RealtimeHub;
use support_widget::routes::widget_routes::boot_handler;
use support_widget::routes::ws_routes::widget_ws_handler;
use support_widget::widget::WidgetServices;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "support_widget=debug,tower_http=debug".into()),
        )
        .init();

    // ── Database ──────────────────────────────────────────────────────────────
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set (copy .env.example to .env)");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to PostgreSQL");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    info!("Database connection established and migrations applied");

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let ollama_base_url = std::env::var("OLLAMA_API_BASE_URL")
        .unwrap_or_else(|_| "http://localhost:11434".to_string());
    let mut responder = OllamaResponder::new(&ollama_base_url);
    if let Ok(model) = std::env::var("OLLAMA_MODEL") {
        responder = responder.with_model(model);
    }

    let services = WidgetServices {
        sessions: Arc::new(PgSessionRepository::new(pool.clone())),
        messages: Arc::new(PgMessageRepository::new(pool.clone())),
        generator: Arc::new(responder),
        hub: RealtimeHub::new(),
    };

    // ── Router ────────────────────────────────────────────────────────────────
    // The widget is embedded on third-party pages, so the API answers
    // cross-origin.
    let app = Router::new()
        .route("/api/widget/boot", post(boot_handler))
        .route("/api/widget/ws", get(widget_ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(services);

    // ── Listen ────────────────────────────────────────────────────────────────
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, app).await?;
    Ok(())
}
