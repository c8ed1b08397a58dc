use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use galley_types::api::{MeResponse, SendMessageRequest, UploadResponse};
use galley_types::events::SubscriptionErrorKind;
use galley_types::models::{ChatRole, Conversation, Message};

use crate::attachment::LocalFile;
use crate::error::ClientError;

/// Maps the platform identity to the numeric chef/manager id.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self) -> Result<MeResponse, ClientError>;
}

/// Conversation and message data access.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn list_conversations(
        &self,
        user_id: i64,
        role: ChatRole,
    ) -> Result<Vec<Conversation>, ClientError>;

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ClientError>;

    async fn send_message(
        &self,
        conversation_id: &str,
        request: &SendMessageRequest,
    ) -> Result<Message, ClientError>;

    async fn mark_read(
        &self,
        conversation_id: &str,
        user_id: i64,
        role: ChatRole,
    ) -> Result<Conversation, ClientError>;
}

/// Upload target for ad hoc chat attachments.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Store `file` under `conversation_id` and return where it can be fetched.
    async fn upload(
        &self,
        conversation_id: &str,
        file: &LocalFile,
    ) -> Result<UploadResponse, ClientError>;
}

/// Read-only application and location data owned by the REST backend.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// All kitchen applications visible to the viewer, in one request.
    async fn applications(&self, role: ChatRole) -> Result<Vec<ApplicationRecord>, ClientError>;

    async fn location_details(&self, location_id: i64) -> Result<LocationDetails, ClientError>;
}

/// Live per-conversation listener.
#[async_trait]
pub trait LiveFeed: Send + Sync {
    async fn subscribe(&self, conversation_id: &str) -> Result<Subscription, ClientError>;
}

/// What a live subscription emits.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Full ordered message list; replaces whatever the listener holds.
    Snapshot(Vec<Message>),
    /// The subscription could not be served. Non-fatal.
    Error {
        kind: SubscriptionErrorKind,
        message: String,
    },
    /// The feed ended (connection closed).
    Closed,
}

/// An open live subscription. Dropping it stops the underlying feed.
pub struct Subscription {
    pub events: mpsc::UnboundedReceiver<FeedEvent>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(events: mpsc::UnboundedReceiver<FeedEvent>, task: Option<JoinHandle<()>>) -> Self {
        Self { events, task }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Kitchen application as returned by the REST backend. Only the fields the
/// chat directory joins on are modelled; the rest is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub id: i64,
    pub chef_id: i64,
    pub location_id: i64,
    #[serde(default)]
    pub status: String,
    /// Applicant (chef) name as entered on the application.
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub manager_name: Option<String>,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub location: Option<EmbeddedLocation>,
    /// Onboarding tier the applicant has reached; tier 1 is complete once
    /// this is 2 or more.
    #[serde(default)]
    pub current_tier: Option<u8>,
}

impl ApplicationRecord {
    /// Location name when the payload embeds it.
    pub fn embedded_location_name(&self) -> Option<&str> {
        self.location_name
            .as_deref()
            .or_else(|| self.location.as_ref().map(|l| l.name.as_str()))
            .filter(|name| !name.trim().is_empty())
    }

    pub fn tier1_completed(&self) -> bool {
        self.current_tier.is_some_and(|tier| tier >= 2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedLocation {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationDetails {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
}
