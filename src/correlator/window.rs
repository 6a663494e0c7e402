//! Time-bounded intake of the responses to one command.
//!
//! The window is the exchange's [`EventSink`]: the session's receive loop
//! offers every inbound message, and the window keeps those that match one of
//! the command's filters, decode cleanly and are not redeliveries. Once
//! closed it keeps nothing more.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::addressing::TopicFilter;
use crate::codec::{self, Fields};
use crate::error::Result;
use crate::mqtt::{EventSink, InboundMessage};

/// A message accepted by the window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedEntry {
    /// Arrival time relative to the window opening
    pub offset: Duration,
    pub message: InboundMessage,
    pub fields: Fields,
}

/// A message on a matching topic whose payload could not be decoded.
///
/// Kept raw so the operator still sees it, e.g. lifecycle notices that
/// devices send as `{'online':1}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEntry {
    pub offset: Duration,
    pub message: InboundMessage,
    pub reason: String,
}

/// Messages the window saw but did not keep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStats {
    pub ignored: usize,
    pub malformed: usize,
    pub duplicates: usize,
    pub late: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Elapsed,
    Cancelled,
    ConnectionLost,
    Closed,
}

#[derive(Default)]
struct WindowState {
    open: bool,
    entries: Vec<CollectedEntry>,
    malformed: Vec<MalformedEntry>,
    seen: HashSet<(String, u16, Vec<u8>)>,
    stats: WindowStats,
    connection_error: Option<String>,
}

pub struct CollectionWindow {
    filters: Vec<TopicFilter>,
    opened_at: Instant,
    state: Mutex<WindowState>,
    closed: CancellationToken,
}

impl CollectionWindow {
    pub fn open(filters: Vec<TopicFilter>) -> Arc<Self> {
        Arc::new(CollectionWindow {
            filters,
            opened_at: Instant::now(),
            state: Mutex::new(WindowState {
                open: true,
                ..WindowState::default()
            }),
            closed: CancellationToken::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn filters(&self) -> &[TopicFilter] {
        &self.filters
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Offers a message; returns whether it was collected
    pub fn offer(&self, message: InboundMessage) -> bool {
        let mut state = self.state();

        if !state.open {
            state.stats.late += 1;
            debug!("Window closed, discarding late message on {}", message.topic());
            return false;
        }

        if !self.filters.iter().any(|f| f.matches(message.topic())) {
            state.stats.ignored += 1;
            debug!("Ignoring message on unrelated topic {}", message.topic());
            return false;
        }

        let fields = match codec::decode(message.payload()) {
            Ok(fields) => fields,
            Err(e) => {
                state.stats.malformed += 1;
                warn!("Dropping malformed {}: {}", message.render(), e);
                state.malformed.push(MalformedEntry {
                    offset: self.opened_at.elapsed(),
                    message,
                    reason: e.to_string(),
                });
                return false;
            }
        };

        if let Some(packet_id) = message.packet_id() {
            let key = (
                message.topic().to_string(),
                packet_id,
                message.payload().to_vec(),
            );
            let first_delivery = state.seen.insert(key);
            if !first_delivery && message.is_duplicate() {
                state.stats.duplicates += 1;
                debug!("Dropping redelivered packet {} on {}", packet_id, message.topic());
                return false;
            }
        }

        info!("{}", message.render());
        let offset = self.opened_at.elapsed();
        state.entries.push(CollectedEntry {
            offset,
            message,
            fields,
        });
        true
    }

    /// Waits until `duration` elapsed, `cancel` fires, or the window is
    /// closed from elsewhere; the window is closed afterwards either way.
    pub async fn wait(&self, duration: Duration, cancel: &CancellationToken) -> CloseReason {
        let reason = tokio::select! {
            _ = tokio::time::sleep(duration) => CloseReason::Elapsed,
            _ = cancel.cancelled() => CloseReason::Cancelled,
            _ = self.closed.cancelled() => {
                if self.state().connection_error.is_some() {
                    CloseReason::ConnectionLost
                } else {
                    CloseReason::Closed
                }
            }
        };
        self.close();
        debug!("Collection window closed: {:?}", reason);
        reason
    }

    pub fn close(&self) {
        self.state().open = false;
        self.closed.cancel();
    }

    pub fn entries(&self) -> Vec<CollectedEntry> {
        self.state().entries.clone()
    }

    pub fn malformed(&self) -> Vec<MalformedEntry> {
        self.state().malformed.clone()
    }

    pub fn stats(&self) -> WindowStats {
        self.state().stats
    }

    pub fn connection_error(&self) -> Option<String> {
        self.state().connection_error.clone()
    }
}

impl EventSink for CollectionWindow {
    fn on_connected(&self, result: &Result<()>) {
        match result {
            Ok(()) => debug!("Window attached to connected session"),
            Err(e) => {
                self.state().connection_error = Some(e.to_string());
                self.close();
            }
        }
    }

    fn on_message(&self, message: InboundMessage) {
        self.offer(message);
    }
}
