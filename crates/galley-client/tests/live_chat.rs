//! Client against a real server: REST and gateway over loopback.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{EncodingKey, Header, encode};
use tokio::net::TcpListener;

use galley_api::auth::AppStateInner;
use galley_api::files::AttachmentStore;
use galley_client::backend::{ChatStore, FeedEvent, LiveFeed};
use galley_client::session::{Backends, ChatSession, SendOutcome};
use galley_client::{ApiClient, ClientConfig, GatewayFeed};
use galley_db::Database;
use galley_gateway::dispatcher::Dispatcher;
use galley_types::api::Claims;
use galley_types::models::{ChatRole, SenderRole};

const SECRET: &str = "live-chat-secret";
const CHEF: i64 = 1;
const MANAGER: i64 = 2;

fn token(user_id: i64, role: ChatRole) -> String {
    let claims = Claims {
        sub: format!("uid-{}", user_id),
        user_id,
        role,
        name: String::new(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

async fn start_server() -> String {
    let dir = std::env::temp_dir().join(format!("galley-live-{}", uuid::Uuid::new_v4()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let state = Arc::new(AppStateInner {
        db: Arc::new(Database::open_in_memory().unwrap()),
        dispatcher: Dispatcher::new(),
        jwt_secret: SECRET.into(),
        attachments: AttachmentStore::new(dir, 1024 * 1024, &base).await.unwrap(),
        service_token: None,
    });
    let app = galley_api::routes::router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

async fn next_snapshot(events: &mut tokio::sync::mpsc::UnboundedReceiver<FeedEvent>) -> Vec<galley_types::models::Message> {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no gateway event in time")
            .expect("feed closed");
        if let FeedEvent::Snapshot(messages) = event {
            return messages;
        }
    }
}

#[tokio::test]
async fn chef_message_reaches_manager_subscription() {
    let base = start_server().await;
    let chef_config = ClientConfig::new(&base, &token(CHEF, ChatRole::Chef));
    let manager_config = ClientConfig::new(&base, &token(MANAGER, ChatRole::Manager));
    let chef_api = ApiClient::new(chef_config);
    let manager_api = ApiClient::new(manager_config.clone());

    let conversation = manager_api
        .open_conversation(10, CHEF, MANAGER, 7)
        .await
        .unwrap();

    let feed = GatewayFeed::new(manager_config.clone());
    let mut subscription = feed.subscribe(&conversation.id).await.unwrap();
    assert!(next_snapshot(&mut subscription.events).await.is_empty());

    let chef = ChatSession::new(&conversation.id, Backends::from_api(chef_api), None);
    chef.resolve_identity().await.unwrap();
    chef.set_text("Hello");
    assert!(matches!(chef.send().await.unwrap(), SendOutcome::Sent(_)));

    let snapshot = next_snapshot(&mut subscription.events).await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].sender_role, SenderRole::Chef);
    assert_eq!(snapshot[0].content, "Hello");

    let listed = manager_api
        .list_conversations(MANAGER, ChatRole::Manager)
        .await
        .unwrap();
    assert_eq!(listed[0].unread_manager_count, 1);
    assert_eq!(listed[0].unread_chef_count, 0);

    // The manager's panel mounts: the initial load reads the backlog.
    let manager = ChatSession::new(
        &conversation.id,
        Backends::from_api(ApiClient::new(manager_config.clone())),
        None,
    );
    let _listener = manager.open(&feed).await.unwrap();
    assert_eq!(manager.messages().len(), 1);
    let listed = manager_api
        .list_conversations(MANAGER, ChatRole::Manager)
        .await
        .unwrap();
    assert_eq!(listed[0].unread_manager_count, 0);

    // While mounted, every live snapshot is read as it arrives.
    chef.set_text("Still there?");
    assert!(matches!(chef.send().await.unwrap(), SendOutcome::Sent(_)));
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let listed = manager_api
                .list_conversations(MANAGER, ChatRole::Manager)
                .await
                .unwrap();
            if manager.messages().len() == 2 && listed[0].unread_manager_count == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("manager session did not read the live update");
    assert_eq!(manager.messages()[1].content, "Still there?");
}

#[tokio::test]
async fn outsider_subscription_is_refused() {
    let base = start_server().await;
    let manager_api = ApiClient::new(ClientConfig::new(&base, &token(MANAGER, ChatRole::Manager)));
    let conversation = manager_api
        .open_conversation(11, CHEF, MANAGER, 7)
        .await
        .unwrap();

    let outsider = GatewayFeed::new(ClientConfig::new(&base, &token(99, ChatRole::Chef)));
    let mut subscription = outsider.subscribe(&conversation.id).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), subscription.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, FeedEvent::Error { .. }));

    let err = manager_api.load_messages("missing").await.unwrap_err();
    assert!(matches!(err, galley_client::ClientError::Status { status: 404, .. }));
}
