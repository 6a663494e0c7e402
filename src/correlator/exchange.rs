//! Request/response exchange with statum state machine
//!
//! # State Machine
//!
//! ```text
//! Preparing ──► Subscribed ──► Published ──► Collecting ──► Closed
//!     │              │             │
//!     └──────────────┴─────────────┴──► error (window closed, caller closes session)
//! ```
//!
//! The cancellation token covers every wait: acknowledgements as well as the
//! collection window.
//!
//! Topics and payload are resolved while `Preparing`, so addressing and codec
//! failures never touch the network. The window starts accepting responses as
//! soon as it is attached to the session, which keeps the echo of our own
//! publish and any very fast reply.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::QoS;
use statum::{machine, state};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::command::Command;
use super::response::Response;
use super::window::{CloseReason, CollectedEntry, CollectionWindow, MalformedEntry, WindowStats};
use crate::addressing::{Operation, Target, TopicSet};
use crate::codec::Fields;
use crate::error::{ProbeError, Result};
use crate::mqtt::Session;

/// States of one exchange using statum
#[state]
#[derive(Debug, Clone)]
pub enum ExchangeState {
    Preparing,  // Topics and payload resolved
    Subscribed, // Every response filter acknowledged
    Published,  // Command acknowledged by the transport
    Collecting, // Window open, waiting
    Closed,     // Window closed, outcome available
}

#[machine]
pub struct Exchange<S: ExchangeState> {
    command: Command,
    topics: TopicSet,
    payload: Vec<u8>,
    qos: QoS,
    window: Arc<CollectionWindow>,
    close_reason: Option<CloseReason>,
}

impl<S: ExchangeState> Exchange<S> {
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn window(&self) -> &Arc<CollectionWindow> {
        &self.window
    }

    fn abort<T>(&self, err: ProbeError) -> Result<T> {
        error!("Exchange {} aborted: {}", self.command, err);
        self.window.close();
        Err(err)
    }
}

impl Exchange<Preparing> {
    pub fn prepare(command: Command, qos: QoS) -> Result<Self> {
        let topics = command.topics()?;
        let payload = command.encode_payload()?;
        let window = CollectionWindow::open(topics.filters()?);

        info!(
            "Prepared {}: publish {} listening on {:?}",
            command, topics.publish, topics.subscribe
        );
        Ok(Self::new(command, topics, payload, qos, window, None))
    }

    /// Attaches the window to the session and subscribes to every response filter
    pub async fn subscribe(
        self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<Exchange<Subscribed>> {
        session.attach(self.window.clone());
        let result = tokio::select! {
            result = session.subscribe(&self.topics.subscribe, self.qos) => result,
            _ = cancel.cancelled() => Err(ProbeError::Cancelled(format!(
                "{} before its subscriptions were acknowledged",
                self.command
            ))),
        };
        if let Err(e) = result {
            return self.abort(e);
        }
        debug!("All response filters acknowledged for {}", self.command);
        Ok(self.transition())
    }
}

impl Exchange<Subscribed> {
    /// Publishes the command and waits for the transport's acknowledgement.
    ///
    /// A `PublishTimeout` ends the exchange; the command may still have been
    /// delivered.
    pub async fn publish(
        self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<Exchange<Published>> {
        let delivery = async {
            session
                .publish(&self.topics.publish, self.payload.clone(), self.qos, false)
                .await?
                .await_ack(session.ack_timeout())
                .await
        };
        let result = tokio::select! {
            result = delivery => result,
            _ = cancel.cancelled() => Err(ProbeError::Cancelled(format!(
                "{} before the broker acknowledged it",
                self.command
            ))),
        };
        if let Err(e) = result {
            return self.abort(e);
        }
        info!("Published {} to {}", self.command, self.topics.publish);
        Ok(self.transition())
    }
}

impl Exchange<Published> {
    pub fn open_window(self) -> Exchange<Collecting> {
        debug!("Collecting responses for {}", self.command);
        self.transition()
    }
}

impl Exchange<Collecting> {
    pub async fn collect(
        mut self,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Exchange<Closed> {
        let reason = self.window.wait(duration, cancel).await;
        info!(
            "Stopped collecting for {} ({:?}), {} responses",
            self.command,
            reason,
            self.window.entries().len()
        );
        self.close_reason = Some(reason);
        self.transition()
    }
}

impl Exchange<Closed> {
    pub fn into_outcome(self) -> Outcome {
        Outcome {
            operation: self.command.operation(),
            target: self.command.target().clone(),
            publish_topic: self.topics.publish.clone(),
            entries: self.window.entries(),
            malformed: self.window.malformed(),
            stats: self.window.stats(),
            close_reason: self.close_reason.unwrap_or(CloseReason::Closed),
            connection_error: self.window.connection_error(),
        }
    }
}

/// Everything one exchange observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub operation: Operation,
    pub target: Target,
    pub publish_topic: String,
    pub entries: Vec<CollectedEntry>,
    /// Matching messages that were not valid payloads, in arrival order
    pub malformed: Vec<MalformedEntry>,
    pub stats: WindowStats,
    pub close_reason: CloseReason,
    pub connection_error: Option<String>,
}

impl Outcome {
    pub fn responses(&self) -> impl Iterator<Item = Response> + '_ {
        self.entries
            .iter()
            .map(|entry| Response::classify(entry.message.topic(), &entry.fields))
    }

    /// Devices that answered with a pong, sorted and unique
    pub fn responders(&self) -> Vec<String> {
        let mut devices: Vec<String> = self
            .responses()
            .filter_map(|response| match response {
                Response::Pong { device, .. } => Some(device),
                _ => None,
            })
            .collect();
        devices.sort();
        devices.dedup();
        devices
    }

    /// Last state reported by `device` during the window
    pub fn latest_state(&self, device: &str) -> Option<Fields> {
        self.responses()
            .filter_map(|response| match response {
                Response::State { device: d, state } if d == device => Some(state),
                _ => None,
            })
            .last()
    }
}

/// Runs one full exchange on an open session.
///
/// The session is left open; closing it on every path is the caller's job.
pub async fn run_exchange(
    session: &mut Session,
    command: Command,
    qos: QoS,
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<Outcome> {
    let prepared = Exchange::prepare(command, qos)?;
    let subscribed = prepared.subscribe(session, cancel).await?;
    let published = subscribed.publish(session, cancel).await?;
    let closed = published.open_window().collect(duration, cancel).await;
    session.detach();
    Ok(closed.into_outcome())
}
