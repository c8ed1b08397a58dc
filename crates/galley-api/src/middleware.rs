use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use galley_gateway::token;

use crate::auth::AppState;

/// Require a valid identity token; its claims are stored as a request
/// extension for the handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(token::bearer)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = token::verify(token, &state.jwt_secret).map_err(|e| {
        debug!("Rejected token on {}: {}", req.uri().path(), e);
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
