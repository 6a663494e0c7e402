//! Error definitions shared by every probe component

use thiserror::Error;

/// Error types for addressing, encoding and bus exchanges
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Device or group id is empty or contains a topic separator/wildcard
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Operation name unknown, or not applicable to the given target kind
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Broker unreachable, CONNECT refused, or the connection dropped
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A subscribe filter was rejected or never acknowledged
    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    /// The transport did not acknowledge a publish in time.
    ///
    /// With at-least-once delivery the message may still have arrived, so
    /// callers should treat this as an unknown outcome.
    #[error("Publish timeout: {0}")]
    PublishTimeout(String),

    /// Payload is not a JSON object of supported primitive values
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Configuration file, environment or flags carried an invalid value
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Interrupted while waiting for the broker
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// An internal channel closed before delivering its result
    #[error("Channel error: {0}")]
    ChannelError(String),
}

pub type Result<T> = std::result::Result<T, ProbeError>;
