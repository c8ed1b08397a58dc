use thiserror::Error;

use galley_types::events::SubscriptionErrorKind;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} {path} returned {status}")]
    Status {
        method: &'static str,
        path: String,
        status: u16,
    },

    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("subscription failed ({kind}): {message}")]
    Subscription {
        kind: SubscriptionErrorKind,
        message: String,
    },

    #[error("\"{name}\" is {size} bytes; chat attachments are limited to {limit} bytes")]
    AttachmentTooLarge { name: String, size: u64, limit: u64 },

    #[error("only kitchen managers can attach facility documents")]
    FacilityDocumentsManagerOnly,

    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Gateway(e.to_string())
    }
}
