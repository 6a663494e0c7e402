//! Seam between the session and the actual bus client.
//!
//! A transport connects and splits into two halves, the same way `rumqttc`
//! splits into `AsyncClient` and `EventLoop`:
//!
//! ```text
//! Transport::connect ──► BusHandle    (subscribe / publish / unsubscribe / disconnect)
//!                    └─► EventSource  (polled by the session's receive loop)
//! ```
//!
//! Acknowledgements travel back through [`AckHandle`]s, which the event source
//! resolves as SUBACK/PUBACK packets arrive.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::QoS;
use tokio::sync::oneshot;

use super::config::BusConfig;
use super::message::InboundMessage;
use crate::error::{ProbeError, Result};

/// Broker verdict on a request: `Err` carries the rejection reason
pub type AckResult = std::result::Result<(), String>;

/// Pending acknowledgement for one subscribe or publish request
#[derive(Debug)]
pub struct AckHandle {
    request: String,
    rx: oneshot::Receiver<AckResult>,
}

/// Returned by publish; completes once the transport confirms delivery
pub type DeliveryHandle = AckHandle;

impl AckHandle {
    /// Creates a handle plus the sender that resolves it
    pub fn pending(request: impl Into<String>) -> (oneshot::Sender<AckResult>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            AckHandle {
                request: request.into(),
                rx,
            },
        )
    }

    /// A handle that is already acknowledged, e.g. QoS 0 publishes
    pub fn acknowledged(request: impl Into<String>) -> Self {
        let (tx, handle) = Self::pending(request);
        let _ = tx.send(Ok(()));
        handle
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    /// Waits for the acknowledgement.
    ///
    /// Fails with [`ProbeError::PublishTimeout`] when nothing arrives within
    /// `timeout`; the request may still have been delivered.
    pub async fn await_ack(self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.rx).await {
            Err(_) => Err(ProbeError::PublishTimeout(format!(
                "no acknowledgement for {} within {:?}",
                self.request, timeout
            ))),
            Ok(Err(_)) => Err(ProbeError::ChannelError(format!(
                "acknowledgement for {} was dropped",
                self.request
            ))),
            Ok(Ok(Err(reason))) => Err(ProbeError::ConnectionError(format!(
                "{} rejected: {}",
                self.request, reason
            ))),
            Ok(Ok(Ok(()))) => Ok(()),
        }
    }
}

/// Events surfaced to the session's receive loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// (Re)connection acknowledged by the broker
    Connected,
    Message(InboundMessage),
    /// Our DISCONNECT went out; nothing more will arrive
    Closed,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        config: &BusConfig,
    ) -> Result<(Arc<dyn BusHandle>, Box<dyn EventSource>)>;
}

#[async_trait]
pub trait BusHandle: Send + Sync {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<AckHandle>;

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<DeliveryHandle>;

    async fn unsubscribe(&self, filter: &str) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

#[async_trait]
pub trait EventSource: Send {
    /// Next event from the bus; an error means the connection is gone
    async fn next_event(&mut self) -> Result<SourceEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolved_ack_completes() {
        let handle = AckHandle::acknowledged("publish TNG/pico1/TPC/PING");
        assert!(handle.await_ack(Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_transport_times_out() {
        let (_tx, handle) = AckHandle::pending("publish TNG/pico1/TPC/PING");
        let result = handle.await_ack(Duration::from_secs(10)).await;
        assert!(matches!(result, Err(ProbeError::PublishTimeout(_))));
    }

    #[tokio::test]
    async fn rejection_and_drop_are_distinguished() {
        let (tx, handle) = AckHandle::pending("subscribe TNG/#");
        tx.send(Err("not authorised".to_string())).unwrap();
        assert!(matches!(
            handle.await_ack(Duration::from_secs(1)).await,
            Err(ProbeError::ConnectionError(_))
        ));

        let (tx, handle) = AckHandle::pending("subscribe TNG/#");
        drop(tx);
        assert!(matches!(
            handle.await_ack(Duration::from_secs(1)).await,
            Err(ProbeError::ChannelError(_))
        ));
    }
}
