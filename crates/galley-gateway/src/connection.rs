use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use galley_db::Database;
use galley_types::api::Claims;
use galley_types::events::{GatewayCommand, GatewayEvent};
use galley_types::models::ChatRole;

use crate::dispatcher::{DispatchedEvent, Dispatcher};
use crate::snapshot;
use crate::token;

/// The server pings every 15 seconds and drops the connection after two
/// unanswered pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

/// Time a client has to send `Identify` after connecting.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<RwLock<HashSet<String>>>;
type WsSink = SplitSink<WebSocket, Message>;

/// Handle a single WebSocket connection: Identify handshake, then the event loop.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sink, mut stream) = socket.split();

    let Some(claims) = wait_for_identify(&mut stream, &jwt_secret).await else {
        warn!("Gateway client did not identify, closing");
        return;
    };
    info!("{} {} connected to gateway", claims.role, claims.user_id);

    let ready = GatewayEvent::Ready {
        user_id: claims.user_id,
        role: claims.role,
    };
    let Ok(ready) = DispatchedEvent::from_event(&ready) else {
        return;
    };
    if send_text(&mut sink, &ready).await.is_err() {
        return;
    }

    serve(sink, stream, dispatcher, db, claims).await;
}

async fn serve(
    sink: WsSink,
    mut stream: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    claims: Claims,
) {
    // Listen to the fan-out first so nothing published from now on is missed.
    let broadcasts = dispatcher.subscribe();
    // First emission of each subscription goes to this connection only.
    let (direct_tx, direct_rx) = mpsc::unbounded_channel::<GatewayEvent>();
    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let pong = Arc::new(AtomicBool::new(true));

    let outbound = Outbound {
        sink,
        user_id: claims.user_id,
        role: claims.role,
        subscriptions: subscriptions.clone(),
        delivered: SnapshotLengths::default(),
    };
    let mut send_task = tokio::spawn(outbound.run(broadcasts, direct_rx, pong.clone()));

    let recv_claims = claims.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(command) => {
                        handle_command(&db, &recv_claims, command, &subscriptions, &direct_tx).await
                    }
                    Err(e) => warn!(
                        "{} {} sent an unreadable command: {} ({})",
                        recv_claims.role,
                        recv_claims.user_id,
                        e,
                        text.chars().take(120).collect::<String>()
                    ),
                },
                Message::Pong(_) => pong.store(true, Ordering::Release),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("{} {} left the gateway", claims.role, claims.user_id);
}

/// Write side of one connection.
struct Outbound {
    sink: WsSink,
    user_id: i64,
    role: ChatRole,
    subscriptions: Subscriptions,
    delivered: SnapshotLengths,
}

impl Outbound {
    async fn run(
        mut self,
        mut broadcasts: broadcast::Receiver<DispatchedEvent>,
        mut direct: mpsc::UnboundedReceiver<GatewayEvent>,
        pong: Arc<AtomicBool>,
    ) {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed: u8 = 0;

        loop {
            let delivered = tokio::select! {
                received = broadcasts.recv() => match received {
                    Ok(event) => self.forward(&event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Gateway connection of user {} skipped {} events", self.user_id, n);
                        true
                    }
                    Err(broadcast::error::RecvError::Closed) => false,
                },
                event = direct.recv() => match event {
                    Some(event) => match DispatchedEvent::from_event(&event) {
                        Ok(event) => self.forward_direct(&event).await,
                        Err(e) => {
                            error!("Failed to serialise direct event: {}", e);
                            true
                        }
                    },
                    None => false,
                },
                _ = heartbeat.tick() => {
                    if pong.swap(false, Ordering::AcqRel) {
                        missed = 0;
                    } else {
                        missed += 1;
                    }
                    if missed >= MAX_MISSED_PONGS {
                        warn!("User {} missed {} pongs, dropping connection", self.user_id, missed);
                        false
                    } else {
                        self.sink.send(Message::Ping(Vec::new().into())).await.is_ok()
                    }
                }
            };
            if !delivered {
                break;
            }
        }
    }

    /// Send a fan-out event if this connection wants it. Returns false once
    /// the socket is gone.
    async fn forward(&mut self, event: &DispatchedEvent) -> bool {
        let wanted = match self.subscriptions.read() {
            Ok(subs) => event.is_for(self.user_id, self.role, |id| subs.contains(id)),
            Err(_) => return false,
        };
        if !wanted {
            return true;
        }
        self.forward_direct(event).await
    }

    async fn forward_direct(&mut self, event: &DispatchedEvent) -> bool {
        if !self.delivered.accept(event) {
            return true;
        }
        send_text(&mut self.sink, event).await.is_ok()
    }
}

async fn send_text(sink: &mut WsSink, event: &DispatchedEvent) -> Result<(), axum::Error> {
    sink.send(Message::Text(event.json.to_string().into())).await
}

/// Messages are append-only, so a snapshot shorter than one already delivered
/// for the same conversation is stale and must not overwrite it.
#[derive(Default)]
struct SnapshotLengths(HashMap<String, usize>);

impl SnapshotLengths {
    fn accept(&mut self, msg: &DispatchedEvent) -> bool {
        let (Some(id), Some(len)) = (&msg.conversation_id, msg.snapshot_len) else {
            return true;
        };
        match self.0.get(id) {
            Some(&seen) if len < seen => {
                debug!("Dropping stale snapshot for {} ({} < {})", id, len, seen);
                false
            }
            _ => {
                self.0.insert(id.clone(), len);
                true
            }
        }
    }
}

async fn wait_for_identify(
    stream: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Claims> {
    let identify = async {
        while let Some(Ok(msg)) = stream.next().await {
            let Message::Text(text) = msg else { continue };
            if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str(&text) {
                return match token::verify(&token, jwt_secret) {
                    Ok(claims) => Some(claims),
                    Err(e) => {
                        debug!("Identify rejected: {}", e);
                        None
                    }
                };
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}

async fn handle_command(
    db: &Arc<Database>,
    claims: &Claims,
    command: GatewayCommand,
    subscriptions: &Subscriptions,
    direct_tx: &mpsc::UnboundedSender<GatewayEvent>,
) {
    match command {
        // Only valid as the first frame
        GatewayCommand::Identify { .. } => {}

        GatewayCommand::Subscribe { conversation_ids } => {
            debug!(
                "{} {} subscribing to {:?}",
                claims.role, claims.user_id, conversation_ids
            );

            // The new list replaces the old one.
            if let Ok(mut subs) = subscriptions.write() {
                subs.retain(|id| conversation_ids.contains(id));
            }

            for conversation_id in conversation_ids {
                if let Some(refusal) = authorize(db, &conversation_id, claims).await {
                    if let GatewayEvent::SubscriptionError { kind, message, .. } = &refusal {
                        warn!("Subscription to {} refused ({}): {}", conversation_id, kind, message);
                    }
                    let _ = direct_tx.send(refusal);
                    continue;
                }

                // Listen before loading so a message landing in between is
                // still delivered; stale snapshots are filtered on send.
                if let Ok(mut subs) = subscriptions.write() {
                    subs.insert(conversation_id.clone());
                }
                let _ = direct_tx.send(first_snapshot(db, &conversation_id).await);
            }
        }

        GatewayCommand::Unsubscribe { conversation_ids } => {
            if let Ok(mut subs) = subscriptions.write() {
                for id in &conversation_ids {
                    subs.remove(id);
                }
            }
        }
    }
}

async fn authorize(db: &Arc<Database>, conversation_id: &str, claims: &Claims) -> Option<GatewayEvent> {
    let db = db.clone();
    let cid = conversation_id.to_string();
    let (user_id, role) = (claims.user_id, claims.role);

    tokio::task::spawn_blocking(move || snapshot::authorize(&db, &cid, user_id, role))
        .await
        .unwrap_or_else(|e| {
            error!("Subscription check for {} panicked: {}", conversation_id, e);
            Some(snapshot::unavailable(conversation_id))
        })
}

async fn first_snapshot(db: &Arc<Database>, conversation_id: &str) -> GatewayEvent {
    let db = db.clone();
    let cid = conversation_id.to_string();

    tokio::task::spawn_blocking(move || snapshot::load_or_unavailable(&db, &cid))
        .await
        .unwrap_or_else(|e| {
            error!("Snapshot load for {} panicked: {}", conversation_id, e);
            snapshot::unavailable(conversation_id)
        })
}
