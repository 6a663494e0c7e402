//! One logical connection to the bus.
//!
//! ```text
//!                    ┌──────────── Session ─────────────┐
//!  subscribe/publish │  BusHandle ──► broker            │
//!  ─────────────────►│                                  │
//!                    │  receive loop (one tokio task)   │
//!                    │    EventSource ──► EventSink     │──► on_connected / on_message
//!                    └──────────────────────────────────┘
//! ```
//!
//! Every filter handed to [`Session::subscribe`] is acknowledged before the
//! call returns, so a publish issued afterwards can never race its own
//! response subscription. [`Session::close`] releases the filters and the
//! connection; dropping a session without closing it still stops the loop.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rumqttc::QoS;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::BusConfig;
use super::message::InboundMessage;
use super::transport::{BusHandle, DeliveryHandle, EventSource, SourceEvent, Transport};
use crate::addressing::TopicFilter;
use crate::error::{ProbeError, Result};

/// How long `close` lets the receive loop flush DISCONNECT before stopping it
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Receiver of connection and message events from a session
pub trait EventSink: Send + Sync {
    fn on_connected(&self, result: &Result<()>);
    fn on_message(&self, message: InboundMessage);
}

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Connected,
    Closing,
    Closed,
    Failed,
}

#[derive(Clone, Debug, Default)]
pub struct SessionStatus {
    pub connection_state: ConnectionState,
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Local>>,
}

type SinkSlot = Arc<Mutex<Option<Arc<dyn EventSink>>>>;
type StatusSlot = Arc<Mutex<SessionStatus>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Session {
    bus: Arc<dyn BusHandle>,
    sink: SinkSlot,
    status: StatusSlot,
    subscriptions: BTreeSet<String>,
    receive_loop: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
    ack_timeout: Duration,
}

impl Session {
    /// Connects through `transport` and starts the receive loop.
    ///
    /// Fails with [`ProbeError::ConnectionError`] when the broker cannot be
    /// reached or refuses the connection.
    pub async fn connect<T>(transport: &T, config: &BusConfig) -> Result<Self>
    where
        T: Transport + ?Sized,
    {
        let (bus, events) = transport.connect(config).await?;

        let sink: SinkSlot = Arc::new(Mutex::new(None));
        let status: StatusSlot = Arc::new(Mutex::new(SessionStatus {
            last_activity: Some(chrono::Local::now()),
            ..SessionStatus::default()
        }));
        let shutdown = CancellationToken::new();

        let receive_loop = tokio::spawn(receive_loop(
            events,
            sink.clone(),
            status.clone(),
            shutdown.clone(),
        ));
        debug!("Receive loop started for {}", config.endpoint());

        Ok(Session {
            bus,
            sink,
            status,
            subscriptions: BTreeSet::new(),
            receive_loop: Some(receive_loop),
            shutdown,
            ack_timeout: config.ack_timeout(),
        })
    }

    /// Replaces the event sink; a connected session greets it right away
    pub fn attach(&self, sink: Arc<dyn EventSink>) {
        let connected = self.is_connected();
        *lock(&self.sink) = Some(sink.clone());
        if connected {
            sink.on_connected(&Ok(()));
        }
    }

    pub fn detach(&self) {
        lock(&self.sink).take();
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.status).clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.status).connection_state == ConnectionState::Connected
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    pub fn subscriptions(&self) -> &BTreeSet<String> {
        &self.subscriptions
    }

    fn ensure_connected(&self) -> Result<()> {
        let status = lock(&self.status);
        match status.connection_state {
            ConnectionState::Connected => Ok(()),
            ref state => Err(ProbeError::ConnectionError(format!(
                "session is {:?}{}",
                state,
                status
                    .error_messages
                    .last()
                    .map(|e| format!(": {}", e))
                    .unwrap_or_default()
            ))),
        }
    }

    /// Subscribes to every filter and waits until all are acknowledged.
    ///
    /// All requests go out first, then the acknowledgements are collected.
    /// Filters are tracked for release as soon as they are requested, so
    /// `close` cleans up even after a partial failure.
    pub async fn subscribe(&mut self, filters: &BTreeSet<String>, qos: QoS) -> Result<()> {
        self.ensure_connected()?;

        let mut pending = Vec::with_capacity(filters.len());
        for filter in filters {
            TopicFilter::parse(filter)?;
            debug!("Subscribing to {} with {:?}", filter, qos);
            let handle = self.bus.subscribe(filter, qos).await?;
            self.subscriptions.insert(filter.clone());
            pending.push((filter, handle));
        }

        for (filter, handle) in pending {
            if let Err(e) = handle.await_ack(self.ack_timeout).await {
                error!("Subscription to {} failed: {}", filter, e);
                return Err(ProbeError::SubscriptionError(format!("{}: {}", filter, e)));
            }
            info!("Subscribed to {}", filter);
        }
        Ok(())
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<DeliveryHandle> {
        self.ensure_connected()?;
        debug!(
            "Publishing {} bytes to {} with {:?} (retain={})",
            payload.len(),
            topic,
            qos,
            retain
        );
        let handle = self.bus.publish(topic, payload, qos, retain).await?;

        let mut status = lock(&self.status);
        status.messages_sent += 1;
        status.last_activity = Some(chrono::Local::now());
        Ok(handle)
    }

    /// Releases subscriptions and the connection, then stops the receive loop
    pub async fn close(mut self) -> Result<()> {
        self.release().await
    }

    async fn release(&mut self) -> Result<()> {
        let was_connected = {
            let mut status = lock(&self.status);
            let connected = status.connection_state == ConnectionState::Connected;
            if connected {
                status.connection_state = ConnectionState::Closing;
            }
            connected
        };

        let mut first_error = None;
        let subscriptions = std::mem::take(&mut self.subscriptions);
        if was_connected {
            for filter in &subscriptions {
                debug!("Unsubscribing from {}", filter);
                if let Err(e) = self.bus.unsubscribe(filter).await {
                    warn!("Failed to unsubscribe from {}: {}", filter, e);
                    first_error.get_or_insert(e);
                }
            }
            if let Err(e) = self.bus.disconnect().await {
                warn!("Failed to send disconnect: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if let Some(mut handle) = self.receive_loop.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                debug!("Receive loop still running after {:?}, stopping it", CLOSE_GRACE);
                self.shutdown.cancel();
                if let Err(e) = handle.await {
                    warn!("Receive loop ended abnormally: {}", e);
                }
            }
        }

        self.detach();
        {
            let mut status = lock(&self.status);
            if status.connection_state != ConnectionState::Failed {
                status.connection_state = ConnectionState::Closed;
            }
        }
        info!("Session closed, released {} subscriptions", subscriptions.len());

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.receive_loop.take() {
            warn!("Session dropped without close, stopping receive loop");
            self.shutdown.cancel();
            handle.abort();
        }
    }
}

fn current_sink(sink: &SinkSlot) -> Option<Arc<dyn EventSink>> {
    lock(sink).clone()
}

async fn receive_loop(
    mut events: Box<dyn EventSource>,
    sink: SinkSlot,
    status: StatusSlot,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Receive loop cancelled");
                break;
            }
            event = events.next_event() => event,
        };

        match event {
            Ok(SourceEvent::Message(message)) => {
                {
                    let mut status = lock(&status);
                    status.messages_received += 1;
                    status.last_activity = Some(message.received_at());
                }
                match current_sink(&sink) {
                    Some(sink) => sink.on_message(message),
                    None => debug!("No sink attached, dropping message on {}", message.topic()),
                }
            }
            Ok(SourceEvent::Connected) => {
                info!("Broker acknowledged reconnection");
                lock(&status).connection_state = ConnectionState::Connected;
                if let Some(sink) = current_sink(&sink) {
                    sink.on_connected(&Ok(()));
                }
            }
            Ok(SourceEvent::Closed) => {
                debug!("Disconnect sent, receive loop finished");
                break;
            }
            Err(e) => {
                error!("Connection lost: {}", e);
                {
                    let mut status = lock(&status);
                    status.connection_state = ConnectionState::Failed;
                    status.error_messages.push(e.to_string());
                }
                if let Some(sink) = current_sink(&sink) {
                    sink.on_connected(&Err(e));
                }
                break;
            }
        }
    }
}
