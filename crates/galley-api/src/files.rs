use std::path::PathBuf;

use anyhow::Result;
use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{error, info};
use uuid::Uuid;

use galley_types::api::{Claims, UploadResponse};

use crate::auth::AppState;
use crate::conversations::load_for_participant;

/// On-disk attachment storage, one directory per conversation:
/// `{dir}/{conversation_id}/{file_id}`.
pub struct AttachmentStore {
    dir: PathBuf,
    max_bytes: usize,
    public_url: String,
}

impl AttachmentStore {
    pub async fn new(dir: PathBuf, max_bytes: usize, public_url: &str) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Attachment storage directory: {}", dir.display());
        Ok(Self {
            dir,
            max_bytes,
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    fn file_path(&self, conversation_id: &Uuid, file_id: &Uuid) -> PathBuf {
        self.dir.join(conversation_id.to_string()).join(file_id.to_string())
    }

    /// Download URL handed back to clients and stored on file messages.
    pub fn url_for(&self, conversation_id: &Uuid, file_id: &Uuid, name: &str) -> String {
        format!(
            "{}/api/chat/files/{}/{}/{}",
            self.public_url, conversation_id, file_id, name
        )
    }

    async fn save(&self, conversation_id: &Uuid, file_id: &Uuid, bytes: &[u8]) -> Result<()> {
        let path = self.file_path(conversation_id, file_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub name: String,
}

/// Keep only the final path component so names can't escape the URL layout.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." || name.len() > 255 {
        return None;
    }
    Some(name.to_string())
}

/// POST /api/chat/conversations/{id}/attachments?name= — raw body upload
/// scoped under the conversation. Returns `{ url, name, size }`.
pub async fn upload_attachment(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<UploadQuery>,
    Extension(claims): Extension<Claims>,
    bytes: Bytes,
) -> Result<impl IntoResponse, StatusCode> {
    if bytes.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if bytes.len() > state.attachments.max_bytes() {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }
    let name = sanitize_file_name(&query.name).ok_or(StatusCode::BAD_REQUEST)?;
    let conversation_uuid: Uuid = conversation_id.parse().map_err(|_| StatusCode::NOT_FOUND)?;

    load_for_participant(&state, &conversation_id, &claims).await?;

    let file_id = Uuid::new_v4();
    state
        .attachments
        .save(&conversation_uuid, &file_id, &bytes)
        .await
        .map_err(|e| {
            error!("Failed to store attachment {} for {}: {}", file_id, conversation_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    info!(
        "{} {} uploaded {} ({} bytes) to conversation {}",
        claims.role,
        claims.user_id,
        name,
        bytes.len(),
        conversation_id
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            url: state.attachments.url_for(&conversation_uuid, &file_id, &name),
            name,
            size: bytes.len() as u64,
        }),
    ))
}

/// GET /api/chat/files/{conversation_id}/{file_id}/{name} — streams a stored
/// attachment back to a participant.
pub async fn download_attachment(
    State(state): State<AppState>,
    Path((conversation_id, file_id, name)): Path<(String, String, String)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    // Validate ids are UUIDs to prevent path traversal
    let conversation_uuid: Uuid = conversation_id.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let file_uuid: Uuid = file_id.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let name = sanitize_file_name(&name).ok_or(StatusCode::BAD_REQUEST)?;

    load_for_participant(&state, &conversation_id, &claims).await?;

    let path = state.attachments.file_path(&conversation_uuid, &file_uuid);
    let file = fs::File::open(&path).await.map_err(|_| StatusCode::NOT_FOUND)?;

    let disposition = format!("attachment; filename=\"{}\"", name.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(file)),
    ))
}
