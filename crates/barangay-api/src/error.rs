use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use barangay_types::api::ErrorBody;

/// `{ "error": "..." }` with the given status.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

/// Run a blocking store call off the async runtime.
pub async fn run_blocking<F, T>(f: F) -> Result<T, StatusCode>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Log a store failure and collapse it to a 500.
pub fn internal(e: anyhow::Error) -> StatusCode {
    error!("Database error: {:#}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}
