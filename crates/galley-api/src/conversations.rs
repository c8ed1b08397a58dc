use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};

use galley_db::NewConversation;
use galley_types::api::{Claims, ListConversationsQuery, MarkReadRequest, OpenConversationRequest};
use galley_types::events::GatewayEvent;
use galley_types::models::{ChatRole, Conversation};

use crate::auth::AppState;
use crate::db_call;

/// GET /api/chat/conversations — conversations of the caller, most recently
/// active first. No conversations is an empty list, not an error.
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListConversationsQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_matches = query.user_id.is_none_or(|id| id == claims.user_id);
    let role_matches = query.role.is_none_or(|role| role == claims.role);
    if !user_matches || !role_matches {
        return Err(StatusCode::FORBIDDEN);
    }

    let db = state.db.clone();
    let (user_id, role) = (claims.user_id, claims.role);
    let conversations = db_call(move || db.list_conversations(user_id, role)).await?;
    Ok(Json(conversations))
}

/// POST /api/chat/conversations — get-or-create the thread for an application.
/// The caller must occupy their own role's slot in the request.
pub async fn open_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<OpenConversationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let own_slot = match claims.role {
        ChatRole::Chef => req.chef_id,
        ChatRole::Manager => req.manager_id,
    };
    if own_slot != claims.user_id {
        warn!(
            "{} {} tried to open a conversation for application {} on someone else's behalf",
            claims.role, claims.user_id, req.application_id
        );
        return Err(StatusCode::FORBIDDEN);
    }

    let db = state.db.clone();
    let new = NewConversation {
        application_id: req.application_id,
        chef_id: req.chef_id,
        manager_id: req.manager_id,
        location_id: req.location_id,
    };
    let conversation = db_call(move || db.get_or_create_conversation(&new)).await?;

    // An existing thread may belong to other participants.
    if !conversation.has_participant(claims.user_id, claims.role) {
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(Json(conversation))
}

/// GET /api/chat/conversations/{id}
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let conversation = load_for_participant(&state, &conversation_id, &claims).await?;
    Ok(Json(conversation))
}

/// POST /api/chat/conversations/{id}/read — zero the caller's role counter.
/// The body names the reader; it must be the token holder.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.user_id != claims.user_id || req.role != claims.role {
        return Err(StatusCode::FORBIDDEN);
    }
    load_for_participant(&state, &conversation_id, &claims).await?;

    let db = state.db.clone();
    let role = claims.role;
    let cid = conversation_id.clone();
    let conversation = db_call(move || db.mark_read(&cid, role)).await?;

    info!("{} {} read conversation {}", claims.role, claims.user_id, conversation_id);
    state.dispatcher.broadcast(&GatewayEvent::ConversationUpdated {
        conversation: conversation.clone(),
    });

    Ok(Json(conversation))
}

/// Load a conversation the caller takes part in: 404 if missing, 403 if the
/// caller is not its chef/manager.
pub(crate) async fn load_for_participant(
    state: &AppState,
    conversation_id: &str,
    claims: &Claims,
) -> Result<Conversation, StatusCode> {
    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let conversation = db_call(move || db.get_conversation(&cid))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    if !conversation.has_participant(claims.user_id, claims.role) {
        warn!(
            "{} {} denied access to conversation {}",
            claims.role, claims.user_id, conversation_id
        );
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(conversation)
}
