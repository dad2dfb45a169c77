//! Error types for the assistant client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the assistant client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Capture device acquisition failed
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Channel could not be opened or broke
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Inbound audio payload could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Audio output device error
    #[error("audio output error: {0}")]
    Output(String),

    /// Service HTTP API returned an error status
    #[error("api error: {0}")]
    Api(String),

    /// Image encoding error
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Operation requires an active session
    #[error("no active session")]
    NotActive,

    /// Start was abandoned by a stop before it completed
    #[error("session start cancelled")]
    Cancelled,

    /// The session controller is no longer running
    #[error("session controller has shut down")]
    ControllerGone,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing error
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
}

/// Capture acquisition failure
///
/// Fatal to `start()` and never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Access to the camera or microphone was refused
    #[error("device permission denied: {0}")]
    PermissionDenied(String),

    /// No device matched the request
    #[error("device not found: {0}")]
    NotFound(String),

    /// A device exists but cannot satisfy the requested constraints
    #[error("device constraints unsatisfiable: {0}")]
    Overconstrained(String),

    /// Any other backend failure
    #[error("device error: {0}")]
    Backend(String),
}

/// Channel open or communication failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The channel could not be opened
    #[error("connection failed: {0}")]
    Open(String),

    /// The channel is no longer open
    #[error("channel closed")]
    Closed,
}

/// Malformed inbound audio payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Neither hex nor base64
    #[error("payload is neither hex nor base64: {0}")]
    Encoding(String),

    /// Decoded byte count is not a whole number of 16-bit samples
    #[error("odd PCM byte count: {0}")]
    OddLength(usize),

    /// Payload decoded to zero samples
    #[error("empty audio payload")]
    Empty,
}

/// Error message reported by the remote service
///
/// Non-fatal: the session continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("service error: {message}")]
pub struct PeerError {
    pub message: String,
}

/// Reason a `start()` did not reach `Active`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("audio output error: {0}")]
    Output(String),
}

impl From<StartError> for Error {
    fn from(err: StartError) -> Self {
        match err {
            StartError::Device(e) => Self::Device(e),
            StartError::Connection(e) => Self::Connection(e),
            StartError::Output(msg) => Self::Output(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_error_maps_to_taxonomy() {
        let err: Error = StartError::Device(DeviceError::NotFound("camera".to_string())).into();
        assert!(matches!(err, Error::Device(DeviceError::NotFound(_))));

        let err: Error = StartError::Connection(ConnectionError::Closed).into();
        assert!(matches!(err, Error::Connection(ConnectionError::Closed)));
    }

    #[test]
    fn test_error_display() {
        let err = Error::from(DeviceError::PermissionDenied("microphone".to_string()));
        assert_eq!(err.to_string(), "device permission denied: microphone");

        let err = PeerError {
            message: "quota exceeded".to_string(),
        };
        assert_eq!(err.to_string(), "service error: quota exceeded");
    }
}
