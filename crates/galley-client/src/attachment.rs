use std::path::Path;

use bytes::Bytes;
use tracing::warn;

use galley_types::api::{SendMessageRequest, UploadResponse};
use galley_types::models::FacilityDocument;

use crate::error::ClientError;

/// Upper bound for ad hoc chat attachments (10 MB).
pub const MAX_CHAT_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

/// Extensions offered by the attachment picker. Advisory only: the server
/// decides what it stores.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "jpg", "jpeg", "png"];

/// Picker filter string, e.g. `.pdf,.doc,.docx,.jpg,.jpeg,.png`.
pub fn accept_attribute() -> String {
    ACCEPTED_EXTENSIONS
        .iter()
        .map(|ext| format!(".{}", ext))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn is_accepted_hint(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ACCEPTED_EXTENSIONS
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(ext))
        })
}

/// A file picked from the local machine, not yet uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFile {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Read a file from disk.
    pub async fn read(path: &Path) -> Result<Self, ClientError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ClientError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Ok(Self::new(name, bytes))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Pre-flight check for the ad hoc picker: rejects files over the size limit
/// before any network call.
pub fn validate_chat_attachment(file: &LocalFile) -> Result<(), ClientError> {
    if file.size() > MAX_CHAT_ATTACHMENT_BYTES {
        warn!(
            "Rejected attachment {} ({} bytes, limit {})",
            file.name,
            file.size(),
            MAX_CHAT_ATTACHMENT_BYTES
        );
        return Err(ClientError::AttachmentTooLarge {
            name: file.name.clone(),
            size: file.size(),
            limit: MAX_CHAT_ATTACHMENT_BYTES,
        });
    }
    if !is_accepted_hint(&file.name) {
        warn!("Attachment {} is not an offered type; sending anyway", file.name);
    }
    Ok(())
}

/// An attachment ready to ride on an outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingAttachment {
    /// An ad hoc file after upload.
    Uploaded(UploadResponse),
    /// A facility document the manager already stores elsewhere.
    FacilityDocument(FacilityDocument),
}

impl OutgoingAttachment {
    pub fn name(&self) -> &str {
        match self {
            Self::Uploaded(u) => &u.name,
            Self::FacilityDocument(d) => &d.name,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Uploaded(u) => &u.url,
            Self::FacilityDocument(d) => &d.url,
        }
    }

    /// Text used when the sender typed nothing.
    pub fn caption(&self) -> String {
        match self {
            Self::Uploaded(u) => format!("Attached file: {}", u.name),
            Self::FacilityDocument(d) => format!("Attached facility document: {}", d.name),
        }
    }
}

/// Build the outgoing payload. `None` means there is nothing to send.
pub fn compose(text: &str, attachment: Option<&OutgoingAttachment>) -> Option<SendMessageRequest> {
    let text = text.trim();
    match attachment {
        None if text.is_empty() => None,
        None => Some(SendMessageRequest {
            content: text.to_string(),
            file_url: None,
            file_name: None,
        }),
        Some(att) => Some(SendMessageRequest {
            content: if text.is_empty() { att.caption() } else { text.to_string() },
            file_url: Some(att.url().to_string()),
            file_name: Some(att.name().to_string()),
        }),
    }
}
