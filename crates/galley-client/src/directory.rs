use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use galley_types::models::{ChatRole, Conversation};

use crate::backend::{ApplicationRecord, ChatStore, MetadataSource};
use crate::error::ClientError;

pub const UNKNOWN_LOCATION: &str = "Unknown location";
const DEFAULT_MANAGER_NAME: &str = "Kitchen manager";
const DEFAULT_CHEF_NAME: &str = "Chef";

/// One row of the conversation list.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    pub conversation: Conversation,
    pub partner_name: String,
    pub location_name: String,
    /// Application status, shown as a badge.
    pub status: String,
    /// Unread count for the viewer's own role.
    pub unread: u32,
}

/// Conversation list of one viewer, enriched with application and location
/// data. Location lookups are cached for the lifetime of the directory,
/// failures included.
pub struct ConversationDirectory {
    store: Arc<dyn ChatStore>,
    metadata: Arc<dyn MetadataSource>,
    location_names: HashMap<i64, String>,
    failed_locations: HashSet<i64>,
    entries: Vec<DirectoryEntry>,
    error: Option<String>,
}

impl ConversationDirectory {
    pub fn new(store: Arc<dyn ChatStore>, metadata: Arc<dyn MetadataSource>) -> Self {
        Self {
            store,
            metadata,
            location_names: HashMap::new(),
            failed_locations: HashSet::new(),
            entries: Vec::new(),
            error: None,
        }
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Last fetch failure; `refresh` again to retry.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Reload the list for `user_id` viewing as `role`.
    pub async fn refresh(&mut self, user_id: i64, role: ChatRole) -> Result<(), ClientError> {
        match self.build(user_id, role).await {
            Ok(entries) => {
                debug!("Directory for {} {}: {} conversations", role, user_id, entries.len());
                self.entries = entries;
                self.error = None;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load conversations for {} {}: {}", role, user_id, e);
                self.entries.clear();
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn build(&mut self, user_id: i64, role: ChatRole) -> Result<Vec<DirectoryEntry>, ClientError> {
        let conversations = self.store.list_conversations(user_id, role).await?;
        let applications: HashMap<i64, ApplicationRecord> = self
            .metadata
            .applications(role)
            .await?
            .into_iter()
            .map(|app| (app.id, app))
            .collect();

        let mut entries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let Some(app) = applications.get(&conversation.application_id) else {
                continue;
            };
            if role == ChatRole::Chef && !app.tier1_completed() {
                continue;
            }

            let location_name = match app.embedded_location_name() {
                Some(name) => name.to_string(),
                None => self.location_name(conversation.location_id).await,
            };
            let partner_name = match role {
                ChatRole::Manager => non_blank(app.full_name.as_deref()).unwrap_or(DEFAULT_CHEF_NAME),
                ChatRole::Chef => {
                    non_blank(app.manager_name.as_deref()).unwrap_or(DEFAULT_MANAGER_NAME)
                }
            };

            entries.push(DirectoryEntry {
                unread: conversation.unread_for(role),
                partner_name: partner_name.to_string(),
                location_name,
                status: app.status.clone(),
                conversation,
            });
        }

        entries.sort_by(|a, b| b.conversation.activity_at().cmp(&a.conversation.activity_at()));
        Ok(entries)
    }

    /// Cached location lookup. A failed id is never asked for again.
    async fn location_name(&mut self, location_id: i64) -> String {
        if let Some(name) = self.location_names.get(&location_id) {
            return name.clone();
        }
        if self.failed_locations.contains(&location_id) {
            return UNKNOWN_LOCATION.to_string();
        }

        match self.metadata.location_details(location_id).await {
            Ok(details) => {
                self.location_names.insert(location_id, details.name.clone());
                details.name
            }
            Err(e) => {
                warn!("Location {} lookup failed: {}", location_id, e);
                self.failed_locations.insert(location_id);
                UNKNOWN_LOCATION.to_string()
            }
        }
    }

    /// Case-insensitive match on partner or location name.
    pub fn search(&self, query: &str) -> Vec<&DirectoryEntry> {
        let query = query.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|e| {
                query.is_empty()
                    || e.partner_name.to_lowercase().contains(&query)
                    || e.location_name.to_lowercase().contains(&query)
            })
            .collect()
    }

    pub fn total_unread(&self) -> u32 {
        self.entries.iter().map(|e| e.unread).sum()
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}
