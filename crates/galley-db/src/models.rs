//! Database row types — these map directly to SQLite rows.
//! Conversion into the galley-types models happens here so callers never see
//! raw timestamp strings.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use tracing::warn;

use galley_types::models::{ChatRole, Conversation, Message, MessageKind, SenderRole};

pub struct ConversationRow {
    pub id: String,
    pub application_id: i64,
    pub chef_id: i64,
    pub manager_id: i64,
    pub location_id: i64,
    pub last_message_at: Option<String>,
    pub unread_chef_count: i64,
    pub unread_manager_count: i64,
    pub created_at: String,
}

impl ConversationRow {
    pub fn into_model(self) -> Result<Conversation> {
        Ok(Conversation {
            last_message_at: self
                .last_message_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            unread_chef_count: clamp_counter(&self.id, self.unread_chef_count),
            unread_manager_count: clamp_counter(&self.id, self.unread_manager_count),
            id: self.id,
            application_id: self.application_id,
            chef_id: self.chef_id,
            manager_id: self.manager_id,
            location_id: self.location_id,
        })
    }
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: Option<i64>,
    pub sender_role: String,
    pub content: String,
    pub kind: String,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_model(self) -> Result<Message> {
        Ok(Message {
            sender_role: self
                .sender_role
                .parse::<SenderRole>()
                .with_context(|| format!("message {}", self.id))?,
            kind: self
                .kind
                .parse::<MessageKind>()
                .with_context(|| format!("message {}", self.id))?,
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content: self.content,
            file_url: self.file_url,
            file_name: self.file_name,
        })
    }
}

/// Input for `get_or_create_conversation`.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub application_id: i64,
    pub chef_id: i64,
    pub manager_id: i64,
    pub location_id: i64,
}

/// Input for `insert_message`. Id and timestamp are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_id: Option<i64>,
    pub sender_role: SenderRole,
    pub content: String,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
}

impl NewMessage {
    pub fn text(conversation_id: &str, sender_id: i64, role: ChatRole, content: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            sender_id: Some(sender_id),
            sender_role: role.into(),
            content: content.to_string(),
            file_url: None,
            file_name: None,
        }
    }

    pub fn system(conversation_id: &str, content: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            sender_id: None,
            sender_role: SenderRole::System,
            content: content.to_string(),
            file_url: None,
            file_name: None,
        }
    }

    pub fn kind(&self) -> MessageKind {
        if self.file_url.is_some() {
            MessageKind::File
        } else {
            MessageKind::Text
        }
    }
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; treat it as UTC.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}

fn clamp_counter(conversation_id: &str, raw: i64) -> u32 {
    u32::try_from(raw).unwrap_or_else(|_| {
        warn!("Counter out of range on conversation {}: {}", conversation_id, raw);
        0
    })
}
