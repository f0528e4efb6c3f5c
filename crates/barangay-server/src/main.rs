mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use barangay_api::auth;
use barangay_api::middleware::{require_admin, require_auth};
use barangay_api::notifications::{self, NotificationStore};
use barangay_api::storage::Storage;
use barangay_api::{AppState, AppStateInner, messages, requests, settings, verification};
use barangay_db::Database;
use barangay_db::models::format_timestamp;
use barangay_gateway::Dispatcher;
use barangay_gateway::connection;

use crate::config::Config;

/// Base64 ID uploads run about a third larger than the decoded cap.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "barangay=debug,barangay_api=debug,barangay_gateway=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database + uploads
    let db = Arc::new(Database::open(&config.db_path)?);
    let uploads = Storage::new(config.upload_dir.clone()).await?;

    if let Some(admin) = &config.admin {
        auth::bootstrap_admin(&db, &admin.name, &admin.email, &admin.password)?;
    }
    if let Some(name) = &config.barangay_name {
        if db.seed_setting("barangay_name", name, &format_timestamp(&chrono::Utc::now()))? {
            info!("Seeded barangay_name setting: {}", name);
        }
    }

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        dispatcher: Dispatcher::new(),
        notifications: NotificationStore::new(),
        uploads,
    });

    let app = router(app_state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Barangay portal listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(app_state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/settings/{name}", get(settings::get_setting_label))
        .route("/gateway", get(ws_upgrade))
        .with_state(app_state.clone());

    let resident_routes = Router::new()
        .route("/me", get(auth::me))
        .route("/verification/submit", post(verification::submit))
        .route("/users/lookup", get(messages::lookup_user))
        .route("/messages", get(messages::get_inbox).post(messages::post_message))
        .route("/messages/with/{user_id}", get(messages::get_conversation))
        .route("/messages/{message_id}/read", post(messages::mark_read))
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/unread-count", get(notifications::get_unread_count))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/{notification_id}/read", post(notifications::mark_read))
        .route("/requests", get(requests::get_my_requests).post(requests::post_request))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state.clone());

    // Layers run outside-in: auth first, then the admin check.
    let admin_routes = Router::new()
        .route("/admin/verification/counts", get(verification::get_counts))
        .route("/admin/verification/pending", get(verification::get_pending))
        .route("/admin/users/{user_id}/verify", post(verification::verify))
        .route("/admin/users/{user_id}/reject", post(verification::reject))
        .route("/admin/users/{user_id}/id-image", get(verification::get_id_image))
        .route("/admin/settings/{name}", put(settings::upsert_setting))
        .route("/admin/requests", get(requests::get_all_requests))
        .route("/admin/requests/{request_id}/status", post(requests::set_request_status))
        .layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    Router::new()
        .merge(public_routes)
        .merge(resident_routes)
        .merge(admin_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
