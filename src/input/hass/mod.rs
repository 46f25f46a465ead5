//! Home Assistant event bus input.
//!
//! The Shortcut fires its alarm list as a Home Assistant event through the
//! REST API. This source subscribes to those events over the websocket API
//! and forwards them to the bridge, reconnecting when the connection drops.

mod client;
pub mod messages;

pub use client::HassConnection;

use std::time::Duration;

use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::{BridgeCommand, BridgeHandle};
use crate::config::HomeAssistantConfig;
use crate::coordinator::InboundEvent;
use crate::error::{BridgeError, Result};

/// Delay between reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Map a bus event to the bridge command it stands for.
pub fn route_event(config: &HomeAssistantConfig, event: InboundEvent) -> Option<BridgeCommand> {
    if event.event_type == config.event_type {
        Some(BridgeCommand::AlarmEvent(event))
    } else if event.event_type == config.refresh_event_type {
        Some(BridgeCommand::RefreshMarker(event))
    } else {
        None
    }
}

async fn run_session(
    config: &HomeAssistantConfig,
    token: &str,
    bridge: &BridgeHandle,
) -> Result<()> {
    let mut conn = HassConnection::connect(&config.url, token).await?;
    conn.subscribe_events(&config.event_type).await?;
    conn.subscribe_events(&config.refresh_event_type).await?;

    while let Some(event) = conn.next_event().await? {
        let event = InboundEvent::from(event);
        match route_event(config, event) {
            Some(command) => bridge.send(command).await?,
            None => warn!("[HA] Unexpected event type received"),
        }
    }
    Ok(())
}

/// Spawn the websocket source.
///
/// Returns `None` when no access token is configured.
pub fn spawn_hass_source(
    config: HomeAssistantConfig,
    bridge: BridgeHandle,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    let Some(token) = config.token.clone() else {
        info!("[HA] No access token configured, websocket source disabled");
        return None;
    };

    Some(tokio::spawn(async move {
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = run_session(&config, &token, &bridge) => result,
            };
            match result {
                Ok(()) => warn!("[HA] Connection closed"),
                Err(BridgeError::BridgeClosed) => break,
                Err(BridgeError::Authentication(message)) => {
                    error!("[HA] Authentication failed: {}", message);
                }
                Err(e) => error!("[HA] Connection error: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
            info!("[HA] Reconnecting to {}", config.url);
        }
        info!("[HA] Websocket source stopped");
    }))
}
