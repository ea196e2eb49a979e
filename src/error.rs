use thiserror::Error;

/// Ошибки сигналинга и переговоров
#[derive(Error, Debug)]
pub enum SignalError {
    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON parsing error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Media engine error
    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),

    /// Local media could not be acquired
    #[error("media unavailable: {0}")]
    MediaUnavailable(String),

    /// Bad ICE server entry in the user-supplied configuration
    #[error("invalid ice server config: {0}")]
    InvalidIceServer(String),

    /// Session channel is gone
    #[error("channel closed")]
    ChannelClosed,

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
