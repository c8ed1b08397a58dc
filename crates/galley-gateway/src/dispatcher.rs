use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, trace};

use galley_types::events::GatewayEvent;
use galley_types::models::ChatRole;

/// An event serialised once and fanned out to every connection.
/// Routing fields are kept alongside so connections can filter without
/// re-parsing the payload.
#[derive(Debug, Clone)]
pub struct DispatchedEvent {
    /// Set for subscription-scoped events (snapshots).
    pub conversation_id: Option<String>,
    /// Set for events addressed to the two participants of a conversation.
    pub participants: Option<[(i64, ChatRole); 2]>,
    /// Message count of a snapshot, used to drop stale snapshots.
    pub snapshot_len: Option<usize>,
    pub json: Arc<str>,
}

impl DispatchedEvent {
    pub fn from_event(event: &GatewayEvent) -> serde_json::Result<Self> {
        Ok(Self {
            conversation_id: event.conversation_id().map(str::to_owned),
            participants: event.participants(),
            snapshot_len: match event {
                GatewayEvent::MessagesSnapshot { messages, .. } => Some(messages.len()),
                _ => None,
            },
            json: serde_json::to_string(event)?.into(),
        })
    }

    /// Whether a connection for `user_id` acting as `role` with the given
    /// subscriptions should receive this event.
    pub fn is_for(&self, user_id: i64, role: ChatRole, subscribed: impl Fn(&str) -> bool) -> bool {
        if let Some(participants) = self.participants {
            if !participants.contains(&(user_id, role)) {
                return false;
            }
        }
        match &self.conversation_id {
            Some(id) => subscribed(id),
            None => true,
        }
    }
}

/// Fans events out to all connected gateway clients.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Fan-out of serialised events; each connection filters for itself
    broadcast_tx: broadcast::Sender<DispatchedEvent>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchedEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: &GatewayEvent) {
        let dispatched = match DispatchedEvent::from_event(event) {
            Ok(d) => d,
            Err(e) => {
                error!("Failed to serialise gateway event: {}", e);
                return;
            }
        };
        // No receivers is not an error: nobody is listening yet.
        if self.inner.broadcast_tx.send(dispatched).is_err() {
            trace!("Gateway event dropped, no connected clients");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use galley_types::models::Conversation;

    fn conversation() -> Conversation {
        Conversation {
            id: "c1".into(),
            application_id: 1,
            chef_id: 10,
            manager_id: 20,
            location_id: 3,
            last_message_at: None,
            unread_chef_count: 0,
            unread_manager_count: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn snapshots_reach_only_subscribed_connections() {
        let event = DispatchedEvent::from_event(&GatewayEvent::MessagesSnapshot {
            conversation_id: "c1".into(),
            messages: vec![],
        })
        .unwrap();

        assert!(event.is_for(10, ChatRole::Chef, |id| id == "c1"));
        assert!(!event.is_for(10, ChatRole::Chef, |id| id == "c2"));
        assert_eq!(event.snapshot_len, Some(0));
    }

    #[test]
    fn conversation_updates_reach_only_participants() {
        let event = DispatchedEvent::from_event(&GatewayEvent::ConversationUpdated {
            conversation: conversation(),
        })
        .unwrap();

        assert!(event.is_for(10, ChatRole::Chef, |_| false));
        assert!(event.is_for(20, ChatRole::Manager, |_| false));
        assert!(!event.is_for(30, ChatRole::Chef, |_| true));

        // Same number, other role: a different person.
        assert!(!event.is_for(10, ChatRole::Manager, |_| true));
        assert!(!event.is_for(20, ChatRole::Chef, |_| true));
    }

    #[tokio::test]
    async fn broadcast_delivers_serialised_payload() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.connection_count(), 1);

        dispatcher.broadcast(&GatewayEvent::MessagesSnapshot {
            conversation_id: "c1".into(),
            messages: vec![],
        });

        let got = rx.recv().await.unwrap();
        assert_eq!(got.conversation_id.as_deref(), Some("c1"));
        assert!(got.json.contains("MessagesSnapshot"));
    }
}
