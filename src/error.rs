use thiserror::Error as ThisError;
use tokio_tungstenite::tungstenite;

#[derive(ThisError, Debug)]
pub enum BridgeError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid custom weekday map: {}", .0.join("; "))]
    InvalidCustomMap(Vec<String>),

    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Home Assistant protocol error: {0}")]
    Protocol(String),

    #[error("Home Assistant authentication failed: {0}")]
    Authentication(String),

    #[error("Bridge event loop is not running")]
    BridgeClosed,

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
