use anyhow::Result;
use tracing::error;

use galley_db::Database;
use galley_types::events::{GatewayEvent, SubscriptionErrorKind};
use galley_types::models::ChatRole;

/// Full ordered message list of a conversation as a gateway event.
pub fn load(db: &Database, conversation_id: &str) -> Result<GatewayEvent> {
    let messages = db.get_messages(conversation_id)?;
    Ok(GatewayEvent::MessagesSnapshot {
        conversation_id: conversation_id.to_string(),
        messages,
    })
}

/// Snapshot of a conversation, or an `Unavailable` error event if the store
/// cannot be read.
pub fn load_or_unavailable(db: &Database, conversation_id: &str) -> GatewayEvent {
    load(db, conversation_id).unwrap_or_else(|e| {
        error!("Snapshot load failed for {}: {}", conversation_id, e);
        unavailable(conversation_id)
    })
}

/// Checks whether the viewer may subscribe to a conversation. Returns the
/// `SubscriptionError` to send back when they may not.
pub fn authorize(
    db: &Database,
    conversation_id: &str,
    user_id: i64,
    role: ChatRole,
) -> Option<GatewayEvent> {
    let conversation = match db.get_conversation(conversation_id) {
        Ok(Some(c)) => c,
        Ok(None) => {
            return Some(GatewayEvent::SubscriptionError {
                conversation_id: conversation_id.to_string(),
                kind: SubscriptionErrorKind::FailedPrecondition,
                message: format!("conversation {} does not exist", conversation_id),
            });
        }
        Err(e) => {
            error!("Subscription lookup failed for {}: {}", conversation_id, e);
            return Some(unavailable(conversation_id));
        }
    };

    if !conversation.has_participant(user_id, role) {
        return Some(GatewayEvent::SubscriptionError {
            conversation_id: conversation_id.to_string(),
            kind: SubscriptionErrorKind::PermissionDenied,
            message: format!("{} {} is not a participant", role, user_id),
        });
    }

    None
}

pub fn unavailable(conversation_id: &str) -> GatewayEvent {
    GatewayEvent::SubscriptionError {
        conversation_id: conversation_id.to_string(),
        kind: SubscriptionErrorKind::Unavailable,
        message: "store unavailable".into(),
    }
}
