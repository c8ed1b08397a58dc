use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of an authenticated chat participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    Chef,
    Manager,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chef => "chef",
            Self::Manager => "manager",
        }
    }

    pub fn counterpart(self) -> Self {
        match self {
            Self::Chef => Self::Manager,
            Self::Manager => Self::Chef,
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatRole {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chef" => Ok(Self::Chef),
            "manager" => Ok(Self::Manager),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Who authored a message. `System` messages are informational notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Chef,
    Manager,
    System,
}

impl SenderRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chef => "chef",
            Self::Manager => "manager",
            Self::System => "system",
        }
    }
}

impl From<ChatRole> for SenderRole {
    fn from(role: ChatRole) -> Self {
        match role {
            ChatRole::Chef => Self::Chef,
            ChatRole::Manager => Self::Manager,
        }
    }
}

impl FromStr for SenderRole {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            other => other.parse::<ChatRole>().map(Self::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    File,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
        }
    }
}

impl FromStr for MessageKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "file" => Ok(Self::File),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A chat thread between one chef and one manager about one kitchen application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub application_id: i64,
    pub chef_id: i64,
    pub manager_id: i64,
    pub location_id: i64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_chef_count: u32,
    pub unread_manager_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Unread count shown to a viewer: the counter owned by their own role.
    pub fn unread_for(&self, role: ChatRole) -> u32 {
        match role {
            ChatRole::Chef => self.unread_chef_count,
            ChatRole::Manager => self.unread_manager_count,
        }
    }

    pub fn has_participant(&self, user_id: i64, role: ChatRole) -> bool {
        match role {
            ChatRole::Chef => self.chef_id == user_id,
            ChatRole::Manager => self.manager_id == user_id,
        }
    }

    /// Id of the other side of the thread, as seen by `role`.
    pub fn partner_id(&self, role: ChatRole) -> i64 {
        match role {
            ChatRole::Chef => self.manager_id,
            ChatRole::Manager => self.chef_id,
        }
    }

    /// Timestamp used for "most recently active first" ordering.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }
}

/// Immutable chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: Option<i64>,
    pub sender_role: SenderRole,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A document a manager already stores elsewhere, attachable without upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityDocument {
    pub name: String,
    pub url: String,
}
