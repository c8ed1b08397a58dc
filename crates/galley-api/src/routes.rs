use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};

use galley_gateway::connection;

use crate::auth::{self, AppState};
use crate::conversations;
use crate::files;
use crate::messages;
use crate::middleware::require_auth;

/// REST surface and `/gateway` WebSocket of the chat service. Tower layers
/// (CORS, tracing) are added by the server binary.
pub fn router(state: AppState) -> Router {
    let upload_limit = state.attachments.max_bytes();

    let protected_routes = Router::new()
        .route("/api/firebase/user/me", get(auth::me))
        .route(
            "/api/chat/conversations",
            get(conversations::list_conversations).post(conversations::open_conversation),
        )
        .route(
            "/api/chat/conversations/{conversation_id}",
            get(conversations::get_conversation),
        )
        .route(
            "/api/chat/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/api/chat/conversations/{conversation_id}/read",
            post(conversations::mark_read),
        )
        .route(
            "/api/chat/conversations/{conversation_id}/attachments",
            post(files::upload_attachment).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/chat/files/{conversation_id}/{file_id}/{name}",
            get(files::download_attachment),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    // Authenticated by service token instead of a user JWT
    let service_routes = Router::new()
        .route(
            "/api/chat/conversations/{conversation_id}/system-messages",
            post(messages::post_system_message),
        )
        .with_state(state.clone());

    // Authenticated by the Identify handshake
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(protected_routes)
        .merge(service_routes)
        .merge(ws_route)
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
