//! # MQTT Integration Module
//!
//! Provides the bus side of a probe: one session per process, connected to a
//! broker, subscribing to response filters and publishing a single command.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs        - Broker endpoint, credentials and timeouts
//! ├── message.rs       - Inbound message representation
//! ├── transport.rs     - Transport traits and acknowledgement handles
//! ├── mqtt_handler.rs  - rumqttc-backed transport
//! └── session.rs       - Session lifecycle and the receive loop
//! ```
//!
//! ## Design Philosophy
//!
//! - **Subscribe before publish**: `Session::subscribe` only returns once the
//!   broker acknowledged every filter
//! - **Explicit acknowledgements**: publishes hand back a `DeliveryHandle`
//!   the caller awaits with a bound
//! - **Replaceable transport**: the session only talks to the `Transport`
//!   traits, so tests run against an in-memory broker

pub mod config;
pub mod message;
pub mod mqtt_handler;
pub mod session;
pub mod transport;

pub use config::BusConfig;
pub use message::InboundMessage;
pub use mqtt_handler::MqttTransport;
pub use rumqttc::QoS;
pub use session::{ConnectionState, EventSink, Session, SessionStatus};
pub use transport::{AckHandle, BusHandle, DeliveryHandle, EventSource, SourceEvent, Transport};

use crate::error::{ProbeError, Result};

/// Maps a numeric delivery level (0, 1, 2) onto [`QoS`]
pub fn qos_from_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ProbeError::ConfigError(format!(
            "QoS level {} is not one of 0, 1, 2",
            other
        ))),
    }
}
