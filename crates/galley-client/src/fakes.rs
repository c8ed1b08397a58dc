//! In-memory backends for driving client components in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::{Semaphore, mpsc};

use galley_types::api::{MeResponse, SendMessageRequest, UploadResponse};
use galley_types::models::{ChatRole, Conversation, Message, MessageKind, SenderRole};

use crate::attachment::LocalFile;
use crate::backend::{
    ApplicationRecord, ChatStore, FeedEvent, FileStorage, IdentityProvider, LiveFeed,
    LocationDetails, MetadataSource, Subscription,
};
use crate::error::ClientError;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub fn conversation(id: &str, application_id: i64, chef_id: i64, manager_id: i64) -> Conversation {
    Conversation {
        id: id.into(),
        application_id,
        chef_id,
        manager_id,
        location_id: 7,
        last_message_at: None,
        unread_chef_count: 0,
        unread_manager_count: 0,
        created_at: base_time(),
    }
}

pub fn application(id: i64, chef_id: i64, location_id: i64) -> ApplicationRecord {
    ApplicationRecord {
        id,
        chef_id,
        location_id,
        status: "approved".into(),
        full_name: None,
        manager_name: None,
        location_name: None,
        location: None,
        current_tier: None,
    }
}

/// Message created `secs` seconds after a fixed base time.
pub fn message_at(
    id: &str,
    sender_id: Option<i64>,
    sender_role: SenderRole,
    content: &str,
    secs: i64,
) -> Message {
    Message {
        id: id.into(),
        conversation_id: "c1".into(),
        sender_id,
        sender_role,
        content: content.into(),
        kind: MessageKind::Text,
        file_url: None,
        file_name: None,
        created_at: base_time() + Duration::seconds(secs),
    }
}

fn unavailable(path: &str) -> ClientError {
    ClientError::Status {
        method: "GET",
        path: path.into(),
        status: 503,
    }
}

pub struct FakeIdentity {
    viewer: Option<MeResponse>,
}

impl FakeIdentity {
    pub fn new(viewer: Option<(i64, ChatRole)>) -> Self {
        Self {
            viewer: viewer.map(|(id, role)| MeResponse {
                id,
                uid: format!("uid-{}", id),
                role,
                name: format!("{} {}", role, id),
            }),
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn resolve(&self) -> Result<MeResponse, ClientError> {
        self.viewer.clone().ok_or(ClientError::Status {
            method: "GET",
            path: "/api/firebase/user/me".into(),
            status: 401,
        })
    }
}

#[derive(Default)]
pub struct FakeStore {
    conversations: Mutex<Vec<Conversation>>,
    messages: Mutex<HashMap<String, Vec<Message>>>,
    fail_reads: AtomicBool,
    fail_sends: AtomicBool,
    send_gate: Mutex<Option<Arc<Semaphore>>>,
    load_calls: AtomicUsize,
    send_calls: AtomicUsize,
    mark_read_calls: AtomicUsize,
}

impl FakeStore {
    pub fn put_conversations(&self, conversations: Vec<Conversation>) {
        *self.conversations.lock().unwrap() = conversations;
    }

    pub fn put_messages(&self, conversation_id: &str, messages: Vec<Message>) {
        self.messages
            .lock()
            .unwrap()
            .insert(conversation_id.into(), messages);
    }

    pub fn conversation(&self, id: &str) -> Option<Conversation> {
        self.conversations
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    pub fn bump_unread(&self, id: &str, chef: u32, manager: u32) {
        for c in self.conversations.lock().unwrap().iter_mut() {
            if c.id == id {
                c.unread_chef_count += chef;
                c.unread_manager_count += manager;
            }
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Block sends until permits are added to the returned semaphore.
    pub fn hold_sends(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.send_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn mark_read_calls(&self) -> usize {
        self.mark_read_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatStore for FakeStore {
    async fn list_conversations(
        &self,
        user_id: i64,
        role: ChatRole,
    ) -> Result<Vec<Conversation>, ClientError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(unavailable("/api/chat/conversations"));
        }
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.has_participant(user_id, role))
            .cloned()
            .collect())
    }

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ClientError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(unavailable("/api/chat/conversations/c1/messages"));
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        request: &SendMessageRequest,
    ) -> Result<Message, ClientError> {
        let n = self.send_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.send_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ClientError::Status {
                method: "POST",
                path: format!("/api/chat/conversations/{}/messages", conversation_id),
                status: 500,
            });
        }

        let message = Message {
            id: format!("sent-{}", n),
            conversation_id: conversation_id.into(),
            sender_id: Some(0),
            sender_role: SenderRole::Chef,
            content: request.content.clone(),
            kind: if request.file_url.is_some() {
                MessageKind::File
            } else {
                MessageKind::Text
            },
            file_url: request.file_url.clone(),
            file_name: request.file_name.clone(),
            created_at: base_time() + Duration::seconds(1000 + n as i64),
        };
        self.messages
            .lock()
            .unwrap()
            .entry(conversation_id.into())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn mark_read(
        &self,
        conversation_id: &str,
        _user_id: i64,
        role: ChatRole,
    ) -> Result<Conversation, ClientError> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        let mut conversations = self.conversations.lock().unwrap();
        let conversation = conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or(ClientError::Status {
                method: "POST",
                path: format!("/api/chat/conversations/{}/read", conversation_id),
                status: 404,
            })?;
        match role {
            ChatRole::Chef => conversation.unread_chef_count = 0,
            ChatRole::Manager => conversation.unread_manager_count = 0,
        }
        Ok(conversation.clone())
    }
}

#[derive(Default)]
pub struct FakeFiles {
    uploads: AtomicUsize,
}

impl FakeFiles {
    pub fn upload_calls(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileStorage for FakeFiles {
    async fn upload(
        &self,
        conversation_id: &str,
        file: &LocalFile,
    ) -> Result<UploadResponse, ClientError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(UploadResponse {
            url: format!("https://files.example/{}/{}", conversation_id, file.name),
            name: file.name.clone(),
            size: file.size(),
        })
    }
}

#[derive(Default)]
pub struct FakeMetadata {
    applications: Mutex<Vec<ApplicationRecord>>,
    locations: Mutex<HashMap<i64, String>>,
    location_calls: AtomicUsize,
}

impl FakeMetadata {
    pub fn put_applications(&self, applications: Vec<ApplicationRecord>) {
        *self.applications.lock().unwrap() = applications;
    }

    pub fn put_location(&self, id: i64, name: &str) {
        self.locations.lock().unwrap().insert(id, name.into());
    }

    pub fn location_calls(&self) -> usize {
        self.location_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataSource for FakeMetadata {
    async fn applications(&self, _role: ChatRole) -> Result<Vec<ApplicationRecord>, ClientError> {
        Ok(self.applications.lock().unwrap().clone())
    }

    async fn location_details(&self, location_id: i64) -> Result<LocationDetails, ClientError> {
        self.location_calls.fetch_add(1, Ordering::SeqCst);
        let path = format!("/api/public/locations/{}/details", location_id);
        self.locations
            .lock()
            .unwrap()
            .get(&location_id)
            .map(|name| LocationDetails {
                name: name.clone(),
                address: None,
            })
            .ok_or(ClientError::Status {
                method: "GET",
                path,
                status: 404,
            })
    }
}

/// Feed whose events are pushed by the test.
#[derive(Default)]
pub struct FakeFeed {
    listeners: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<FeedEvent>>>>,
}

impl FakeFeed {
    /// Deliver `event` to every live subscriber of `conversation_id`.
    /// Returns whether anyone received it.
    pub fn emit(&self, conversation_id: &str, event: FeedEvent) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let Some(senders) = listeners.get_mut(conversation_id) else {
            return false;
        };
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        !senders.is_empty()
    }
}

#[async_trait]
impl LiveFeed for FakeFeed {
    async fn subscribe(&self, conversation_id: &str) -> Result<Subscription, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .unwrap()
            .entry(conversation_id.into())
            .or_default()
            .push(tx);
        Ok(Subscription::new(rx, None))
    }
}
