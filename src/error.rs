use thiserror::Error;

/// Gateway-wide error type
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("incompatible shared-memory channel: {0}")]
    IncompatibleChannel(String),

    #[error("emulator gone: {0}")]
    EmulatorGone(String),

    #[error("codec initialization failed: {0}")]
    CodecInit(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("peer send failed [{peer}]: {reason}")]
    PeerSend { peer: String, reason: String },

    #[error("malformed signaling message: {0}")]
    SignalingMalformed(String),

    #[error("startup failed: {0}")]
    Startup(String),

    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<webrtc::Error> for GatewayError {
    fn from(e: webrtc::Error) -> Self {
        GatewayError::WebRtc(e.to_string())
    }
}

/// Result type alias used throughout the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;
