pub mod auth;
pub mod conversations;
pub mod files;
pub mod messages;
pub mod middleware;
pub mod routes;

use axum::http::StatusCode;
use tracing::error;

/// Run blocking DB work off the async runtime, logging and mapping failures
/// to a 500.
pub(crate) async fn db_call<F, T>(f: F) -> Result<T, StatusCode>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("DB error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
