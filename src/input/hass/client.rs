//! Home Assistant websocket API client.

use futures_util::{SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::messages::{
    AuthClientMessage, AuthServerMessage, ClientMessage, HassEvent, Packet, PacketId,
    ServerMessage,
};
use crate::error::{BridgeError, Result};

/// An authenticated websocket session.
pub struct HassConnection {
    conn: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u32,
}

async fn get_auth_message(
    mut conn: impl Stream<Item = tungstenite::Result<Message>> + Unpin,
) -> Result<AuthServerMessage> {
    match conn.next().await {
        Some(Ok(Message::Text(txt))) => {
            serde_json::from_str::<AuthServerMessage>(&txt).map_err(BridgeError::from)
        }
        Some(Ok(msg)) => Err(BridgeError::Protocol(format!(
            "expected text message, got: {:?}",
            msg
        ))),
        Some(Err(e)) => Err(BridgeError::WebSocket(e)),
        None => Err(BridgeError::Protocol(
            "connection closed unexpectedly".to_string(),
        )),
    }
}

impl HassConnection {
    /// Connect and run the authentication phase.
    pub async fn connect(url: &str, token: &str) -> Result<Self> {
        let (mut conn, _response) = tokio_tungstenite::connect_async(url).await?;

        match get_auth_message(&mut conn).await? {
            AuthServerMessage::AuthRequired { ha_version } => {
                info!("[HA] Connected to Home Assistant version {}", ha_version);
            }
            other => {
                return Err(BridgeError::Protocol(format!(
                    "expected auth_required message, got: {other:?}"
                )));
            }
        }

        let auth = AuthClientMessage::Auth {
            access_token: token.to_owned(),
        };
        conn.send(Message::text(serde_json::to_string(&auth)?))
            .await?;

        match get_auth_message(&mut conn).await? {
            AuthServerMessage::AuthOk { .. } => info!("[HA] Authentication successful"),
            AuthServerMessage::AuthInvalid { message } => {
                return Err(BridgeError::Authentication(message));
            }
            other => {
                return Err(BridgeError::Protocol(format!(
                    "expected auth outcome, got: {other:?}"
                )));
            }
        }

        Ok(Self { conn, next_id: 1 })
    }

    async fn send(&mut self, payload: ClientMessage) -> Result<PacketId> {
        let id = PacketId(self.next_id);
        self.next_id += 1;
        let text = serde_json::to_string(&Packet { id, payload })?;
        self.conn.send(Message::text(text)).await?;
        Ok(id)
    }

    /// Subscribe to one event type on the event bus.
    pub async fn subscribe_events(&mut self, event_type: &str) -> Result<PacketId> {
        let id = self
            .send(ClientMessage::SubscribeEvents {
                event_type: Some(event_type.to_string()),
            })
            .await?;
        info!("[HA] Subscribed to {} (id {})", event_type, id.0);
        Ok(id)
    }

    /// Wait for the next bus event.
    ///
    /// Returns `Ok(None)` when the server closes the connection. Failed
    /// command results are reported as protocol errors.
    pub async fn next_event(&mut self) -> Result<Option<HassEvent>> {
        loop {
            let txt = match self.conn.next().await {
                Some(Ok(Message::Text(txt))) => txt,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    debug!("[HA] Server closed connection: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(msg)) => {
                    warn!("[HA] Expected text message, got: {:?}", msg);
                    continue;
                }
                Some(Err(e)) => return Err(BridgeError::WebSocket(e)),
                None => return Ok(None),
            };

            let packet = match serde_json::from_str::<Packet<ServerMessage>>(&txt) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("[HA] Ignoring message ({}): {}", e, txt.as_str());
                    continue;
                }
            };

            match packet.payload {
                ServerMessage::Event { event } => return Ok(Some(event)),
                ServerMessage::Result { success: true, .. } => {
                    debug!("[HA] Command {} succeeded", packet.id.0);
                }
                ServerMessage::Result { error, .. } => {
                    let reason = error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown error".to_string());
                    return Err(BridgeError::Protocol(format!(
                        "command {} failed: {}",
                        packet.id.0, reason
                    )));
                }
            }
        }
    }
}
