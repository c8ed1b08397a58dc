use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use tracing::{error, info, warn};

use galley_db::NewMessage;
use galley_gateway::snapshot;
use galley_types::api::{Claims, SendMessageRequest, SystemMessageRequest};
use galley_types::events::GatewayEvent;
use galley_types::models::{Conversation, Message};

use crate::auth::AppState;
use crate::conversations::load_for_participant;
use crate::db_call;

/// Header carrying the backend's service token on system-message requests.
pub const SERVICE_TOKEN_HEADER: &str = "x-service-token";

/// GET /api/chat/conversations/{id}/messages — full history, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    load_for_participant(&state, &conversation_id, &claims).await?;

    let db = state.db.clone();
    let messages = db_call(move || db.get_messages(&conversation_id)).await?;
    Ok(Json(messages))
}

/// POST /api/chat/conversations/{id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let file_url = req.file_url().map(str::to_owned);
    if req.file_name.is_some() && file_url.is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }

    load_for_participant(&state, &conversation_id, &claims).await?;

    let new = NewMessage {
        conversation_id: conversation_id.clone(),
        sender_id: Some(claims.user_id),
        sender_role: claims.role.into(),
        content: req.content,
        file_url,
        file_name: req.file_name,
    };
    let message = store_and_publish(&state, new).await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /api/chat/conversations/{id}/system-messages — informational notice
/// posted by the backend (e.g. application status changes).
pub async fn post_system_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SystemMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let expected = state.service_token.as_deref().ok_or(StatusCode::FORBIDDEN)?;
    let given = headers
        .get(SERVICE_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::FORBIDDEN)?;
    if given != expected {
        warn!("Rejected system message for {}: bad service token", conversation_id);
        return Err(StatusCode::FORBIDDEN);
    }

    if req.content.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let cid = conversation_id.clone();
    if db_call(move || db.get_conversation(&cid)).await?.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }

    let message = store_and_publish(&state, NewMessage::system(&conversation_id, &req.content)).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Persist a message, then push the conversation's new full snapshot to its
/// subscribers and the updated counters to both participants.
async fn store_and_publish(state: &AppState, new: NewMessage) -> Result<Message, StatusCode> {
    let db = state.db.clone();
    let (message, conversation) = db_call(move || db.insert_message(&new)).await?;

    info!(
        "{} message {} in conversation {}",
        message.sender_role.as_str(),
        message.id,
        message.conversation_id
    );

    publish(state, conversation).await;
    Ok(message)
}

async fn publish(state: &AppState, conversation: Conversation) {
    let db = state.db.clone();
    let cid = conversation.id.clone();
    match tokio::task::spawn_blocking(move || snapshot::load(&db, &cid)).await {
        Ok(Ok(event)) => state.dispatcher.broadcast(&event),
        // The message is stored; subscribers catch up on the next snapshot.
        Ok(Err(e)) => error!("Snapshot load failed for {}: {:#}", conversation.id, e),
        Err(e) => error!("spawn_blocking join error: {}", e),
    }

    state
        .dispatcher
        .broadcast(&GatewayEvent::ConversationUpdated { conversation });
}
