use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use galley_types::events::{GatewayCommand, GatewayEvent};
use galley_types::models::ChatRole;

use crate::backend::{FeedEvent, LiveFeed, Subscription};
use crate::config::ClientConfig;
use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Live feed over the `/gateway` WebSocket. Each subscription owns its own
/// identified connection, so dropping the [`Subscription`] closes exactly
/// that listener.
#[derive(Clone)]
pub struct GatewayFeed {
    config: ClientConfig,
}

impl GatewayFeed {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> Result<WsStream, ClientError> {
        let (mut ws, _) = connect_async(self.config.gateway_url.as_str()).await?;

        send_command(
            &mut ws,
            &GatewayCommand::Identify {
                token: self.config.token.clone(),
            },
        )
        .await?;

        let (user_id, role) = tokio::time::timeout(READY_TIMEOUT, wait_for_ready(&mut ws))
            .await
            .map_err(|_| ClientError::Gateway("timed out waiting for Ready".into()))??;

        info!("Gateway ready for {} {}", role, user_id);
        Ok(ws)
    }
}

#[async_trait]
impl LiveFeed for GatewayFeed {
    async fn subscribe(&self, conversation_id: &str) -> Result<Subscription, ClientError> {
        let mut ws = self.connect().await?;
        send_command(
            &mut ws,
            &GatewayCommand::Subscribe {
                conversation_ids: vec![conversation_id.to_string()],
            },
        )
        .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cid = conversation_id.to_string();
        let task = tokio::spawn(async move {
            while let Some(frame) = ws.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Gateway read error on {}: {}", cid, e);
                        break;
                    }
                };
                let forwarded = match parse_event(frame) {
                    Some(GatewayEvent::MessagesSnapshot {
                        conversation_id,
                        messages,
                    }) if conversation_id == cid => FeedEvent::Snapshot(messages),
                    Some(GatewayEvent::SubscriptionError {
                        conversation_id,
                        kind,
                        message,
                    }) if conversation_id == cid => FeedEvent::Error { kind, message },
                    _ => continue,
                };
                if tx.send(forwarded).is_err() {
                    // Listener gone
                    let _ = ws.close(None).await;
                    return;
                }
            }
            debug!("Gateway feed for {} ended", cid);
            let _ = tx.send(FeedEvent::Closed);
        });

        Ok(Subscription::new(rx, Some(task)))
    }
}

async fn wait_for_ready(ws: &mut WsStream) -> Result<(i64, ChatRole), ClientError> {
    while let Some(frame) = ws.next().await {
        if let Some(GatewayEvent::Ready { user_id, role }) = parse_event(frame?) {
            return Ok((user_id, role));
        }
    }
    Err(ClientError::Gateway("connection closed before Ready".into()))
}

async fn send_command(ws: &mut WsStream, command: &GatewayCommand) -> Result<(), ClientError> {
    let json = serde_json::to_string(command)?;
    ws.send(WsMessage::text(json)).await?;
    Ok(())
}

/// Decode a text frame into an event; control frames and unknown payloads
/// yield `None`.
fn parse_event(frame: WsMessage) -> Option<GatewayEvent> {
    match frame {
        WsMessage::Text(text) => match serde_json::from_str(text.as_str()) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!("Ignoring unrecognised gateway payload: {}", e);
                None
            }
        },
        _ => None,
    }
}
