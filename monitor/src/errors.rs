use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Not connected (state: {0})")]
    NotConnected(crate::connection::ConnectionState),

    #[error("Malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    #[error("Unrecognised message shape: {0}")]
    InvalidShape(String),

    #[error("UI element not found: {0}")]
    MissingUiElement(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel send error")]
    ChannelSend,
}

pub type Result<T> = std::result::Result<T, Error>;
