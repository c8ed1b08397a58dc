use serde::{Deserialize, Serialize};

use crate::models::ChatRole;

// -- JWT Claims --

/// Claims of the identity token minted by the platform auth provider.
/// Shared by the REST middleware and the gateway's Identify handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Platform identity (auth provider uid).
    pub sub: String,
    /// Numeric chef/manager id used everywhere else.
    pub user_id: i64,
    pub role: ChatRole,
    #[serde(default)]
    pub name: String,
    pub exp: usize,
}

// -- Identity --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub id: i64,
    pub uid: String,
    pub role: ChatRole,
    pub name: String,
}

// -- Conversations --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OpenConversationRequest {
    pub application_id: i64,
    pub chef_id: i64,
    pub manager_id: i64,
    pub location_id: i64,
}

/// Optional echo of the caller's identity on listing; must match the token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListConversationsQuery {
    pub user_id: Option<i64>,
    pub role: Option<ChatRole>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MarkReadRequest {
    pub user_id: i64,
    pub role: ChatRole,
}

// -- Messages --

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl SendMessageRequest {
    /// A message needs text or a file to be worth storing. A blank file URL
    /// counts as no file.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.file_url().is_none()
    }

    /// The attached file URL, if it is not blank.
    pub fn file_url(&self) -> Option<&str> {
        self.file_url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemMessageRequest {
    pub content: String,
}

// -- Attachments --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
    pub name: String,
    pub size: u64,
}
