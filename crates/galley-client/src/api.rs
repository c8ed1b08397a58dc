use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use galley_types::api::{
    MarkReadRequest, MeResponse, OpenConversationRequest, SendMessageRequest, UploadResponse,
};
use galley_types::models::{ChatRole, Conversation, Message};

use crate::attachment::LocalFile;
use crate::backend::{
    ApplicationRecord, ChatStore, FileStorage, IdentityProvider, LocationDetails, MetadataSource,
};
use crate::config::ClientConfig;
use crate::error::ClientError;

/// REST adapter for the chat service and the surrounding platform API.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    config: ClientConfig,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open (or fetch) the conversation for an application.
    pub async fn open_conversation(
        &self,
        application_id: i64,
        chef_id: i64,
        manager_id: i64,
        location_id: i64,
    ) -> Result<Conversation, ClientError> {
        let path = "/api/chat/conversations";
        let body = OpenConversationRequest {
            application_id,
            chef_id,
            manager_id,
            location_id,
        };
        let resp = self.send("POST", path, self.post(path).json(&body)).await?;
        decode(resp).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.url(path)).bearer_auth(&self.config.token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http.post(self.url(path)).bearer_auth(&self.config.token)
    }

    async fn send(
        &self,
        method: &'static str,
        path: &str,
        request: RequestBuilder,
    ) -> Result<Response, ClientError> {
        let resp = request.send().await?;
        let status = resp.status();
        debug!("{} {} -> {}", method, path, status);
        if !status.is_success() {
            return Err(ClientError::Status {
                method,
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl IdentityProvider for ApiClient {
    async fn resolve(&self) -> Result<MeResponse, ClientError> {
        let path = "/api/firebase/user/me";
        let resp = self.send("GET", path, self.get(path)).await?;
        decode(resp).await
    }
}

#[async_trait]
impl ChatStore for ApiClient {
    async fn list_conversations(
        &self,
        user_id: i64,
        role: ChatRole,
    ) -> Result<Vec<Conversation>, ClientError> {
        let path = "/api/chat/conversations";
        let request = self
            .get(path)
            .query(&[("userId", user_id.to_string()), ("role", role.to_string())]);
        let resp = self.send("GET", path, request).await?;
        decode(resp).await
    }

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ClientError> {
        let path = format!("/api/chat/conversations/{}/messages", conversation_id);
        let resp = self.send("GET", &path, self.get(&path)).await?;
        decode(resp).await
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        request: &SendMessageRequest,
    ) -> Result<Message, ClientError> {
        let path = format!("/api/chat/conversations/{}/messages", conversation_id);
        let resp = self.send("POST", &path, self.post(&path).json(request)).await?;
        decode(resp).await
    }

    async fn mark_read(
        &self,
        conversation_id: &str,
        user_id: i64,
        role: ChatRole,
    ) -> Result<Conversation, ClientError> {
        let path = format!("/api/chat/conversations/{}/read", conversation_id);
        let body = MarkReadRequest { user_id, role };
        let resp = self.send("POST", &path, self.post(&path).json(&body)).await?;
        decode(resp).await
    }
}

#[async_trait]
impl FileStorage for ApiClient {
    async fn upload(
        &self,
        conversation_id: &str,
        file: &LocalFile,
    ) -> Result<UploadResponse, ClientError> {
        let path = format!("/api/chat/conversations/{}/attachments", conversation_id);
        let mut request = self
            .post(&path)
            .query(&[("name", file.name.as_str())])
            .body(file.bytes.clone());
        if let Some(content_type) = &file.content_type {
            request = request.header(reqwest::header::CONTENT_TYPE, content_type);
        }
        let resp = self.send("POST", &path, request).await?;
        decode(resp).await
    }
}

#[async_trait]
impl MetadataSource for ApiClient {
    async fn applications(&self, role: ChatRole) -> Result<Vec<ApplicationRecord>, ClientError> {
        let path = match role {
            ChatRole::Manager => "/api/manager/kitchen-applications",
            ChatRole::Chef => "/api/firebase/chef/kitchen-applications",
        };
        let resp = self.send("GET", path, self.get(path)).await?;
        decode(resp).await
    }

    async fn location_details(&self, location_id: i64) -> Result<LocationDetails, ClientError> {
        let path = format!("/api/public/locations/{}/details", location_id);
        let resp = self.send("GET", &path, self.get(&path)).await?;
        decode(resp).await
    }
}
