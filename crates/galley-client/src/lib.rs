//! Headless client for the Galley chat service.
//!
//! The UI-facing pieces (conversation directory, chat session, attachment
//! handling, message rendering) are plain state machines driven through the
//! traits in [`backend`], so they run the same against the HTTP/WebSocket
//! adapters and against in-memory fakes.

pub mod api;
pub mod attachment;
pub mod backend;
pub mod config;
pub mod directory;
pub mod error;
pub mod feed;
pub mod render;
pub mod session;

#[cfg(test)]
pub(crate) mod fakes;

pub use api::ApiClient;
pub use config::ClientConfig;
pub use directory::{ConversationDirectory, DirectoryEntry};
pub use error::ClientError;
pub use feed::GatewayFeed;
pub use session::{ChatSession, SendOutcome};
