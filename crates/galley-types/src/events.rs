use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{ChatRole, Conversation, Message};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: i64, role: ChatRole },

    /// Full ordered message list of a conversation. Never a delta: clients
    /// replace whatever they hold with `messages`.
    MessagesSnapshot {
        conversation_id: String,
        messages: Vec<Message>,
    },

    /// Conversation metadata (unread counters, last activity) changed
    ConversationUpdated { conversation: Conversation },

    /// A subscription could not be served
    SubscriptionError {
        conversation_id: String,
        kind: SubscriptionErrorKind,
        message: String,
    },
}

impl GatewayEvent {
    /// Returns the conversation id if this event is scoped to a subscription.
    /// Events that return `None` are routed some other way.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::MessagesSnapshot { conversation_id, .. } => Some(conversation_id),
            Self::SubscriptionError { conversation_id, .. } => Some(conversation_id),
            _ => None,
        }
    }

    /// Users the event is addressed to, regardless of subscriptions. Chef and
    /// manager ids are separate spaces, so each id travels with its role.
    pub fn participants(&self) -> Option<[(i64, ChatRole); 2]> {
        match self {
            Self::ConversationUpdated { conversation } => Some([
                (conversation.chef_id, ChatRole::Chef),
                (conversation.manager_id, ChatRole::Manager),
            ]),
            _ => None,
        }
    }
}

/// Why a live subscription failed. Non-fatal for the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionErrorKind {
    /// Viewer is not a participant of the conversation
    PermissionDenied,
    /// Conversation does not exist (yet)
    FailedPrecondition,
    /// Store could not be read
    Unavailable,
}

impl fmt::Display for SubscriptionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PermissionDenied => "permission-denied",
            Self::FailedPrecondition => "failed-precondition",
            Self::Unavailable => "unavailable",
        })
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Replace the set of conversations this connection listens to.
    /// Each accepted id is answered with an immediate snapshot.
    Subscribe { conversation_ids: Vec<String> },

    /// Stop listening to the given conversations
    Unsubscribe { conversation_ids: Vec<String> },
}
