use std::sync::Arc;

use axum::{Extension, Json};

use galley_db::Database;
use galley_gateway::dispatcher::Dispatcher;
use galley_types::api::{Claims, MeResponse};

use crate::files::AttachmentStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub attachments: AttachmentStore,
    /// Shared secret for backend-originated system notices. `None` disables them.
    pub service_token: Option<String>,
}

/// GET /api/firebase/user/me — maps the platform identity to the numeric
/// chef/manager id used by every other route.
pub async fn me(Extension(claims): Extension<Claims>) -> Json<MeResponse> {
    Json(MeResponse {
        id: claims.user_id,
        uid: claims.sub,
        role: claims.role,
        name: claims.name,
    })
}
