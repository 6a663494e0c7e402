//! In-memory broker for exercising sessions and exchanges without a network.
//!
//! Routes publishes to matching subscriptions, acknowledges subscribes after a
//! configurable delay and can play a fleet of twins answering pings and
//! state requests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use twinprobe::addressing::TopicFilter;
use twinprobe::codec::{self, Field};
use twinprobe::mqtt::transport::AckResult;
use twinprobe::mqtt::{
    AckHandle, BusConfig, BusHandle, DeliveryHandle, EventSource, InboundMessage, QoS,
    SourceEvent, Transport,
};
use twinprobe::{ProbeError, Result};

/// Delay between a twin receiving a request and its answer
pub const TWIN_LATENCY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Subscribe(String),
    SubAck(String),
    Publish { topic: String, payload: Vec<u8> },
    Unsubscribe(String),
    Disconnect,
}

#[derive(Debug, Clone)]
pub struct Behavior {
    pub suback_delay: Duration,
    pub reject_filter: Option<String>,
    pub ack_publishes: bool,
    pub refuse_connect: bool,
    pub twins: Vec<String>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            suback_delay: Duration::from_millis(20),
            reject_filter: None,
            ack_publishes: true,
            refuse_connect: false,
            twins: Vec::new(),
        }
    }
}

type EventTx = mpsc::UnboundedSender<Result<SourceEvent>>;
type EventRx = mpsc::UnboundedReceiver<Result<SourceEvent>>;

struct Shared {
    behavior: Behavior,
    calls: Mutex<Vec<Call>>,
    subscriptions: Mutex<BTreeSet<String>>,
    twin_state: Mutex<BTreeMap<String, bool>>,
    held_acks: Mutex<Vec<oneshot::Sender<AckResult>>>,
    events_tx: EventTx,
    events_rx: Mutex<Option<EventRx>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }

    /// Delivers once per client, however many filters match
    fn route(&self, topic: &str, payload: &[u8]) {
        let subscribed = lock(&self.subscriptions).iter().any(|filter| {
            TopicFilter::parse(filter)
                .map(|f| f.matches(topic))
                .unwrap_or(false)
        });
        if subscribed {
            let message = InboundMessage::from_topic(topic, payload.to_vec());
            let _ = self.events_tx.send(Ok(SourceEvent::Message(message)));
        }
    }

    fn is_twin(&self, device: &str) -> bool {
        self.behavior.twins.iter().any(|t| t == device)
    }

    fn state_report(&self, device: &str) -> Vec<u8> {
        let on = lock(&self.twin_state).get(device).copied().unwrap_or(false);
        format!(r#"{{"state":{{"on":{}}}}}"#, on).into_bytes()
    }

    /// Answers the twin protocol: `(topic, payload)` pairs to publish
    fn twin_replies(&self, topic: &str, payload: &[u8]) -> Vec<(String, Vec<u8>)> {
        let levels: Vec<&str> = topic.split('/').collect();
        match levels.as_slice() {
            ["TNG", device, "TPC", "PING"] if self.is_twin(device) => {
                vec![(format!("TNG/{}/TPC/PONG", device), payload.to_vec())]
            }
            ["GRP", "ALL", "TPC", "PING"] => self
                .behavior
                .twins
                .iter()
                .map(|device| (format!("TNG/{}/TPC/PONG", device), payload.to_vec()))
                .collect(),
            ["TNG", device, "STATE", "GET"] if self.is_twin(device) => {
                vec![(format!("TNG/{}/STATE/UPD", device), self.state_report(device))]
            }
            ["TNG", device, "STATE", "SET"] if self.is_twin(device) => {
                let on = codec::decode(payload)
                    .ok()
                    .and_then(|fields| fields.get("state").and_then(Field::as_map).cloned())
                    .and_then(|state| state.get("on").and_then(Field::as_bool));
                if let Some(on) = on {
                    lock(&self.twin_state).insert(device.to_string(), on);
                }
                vec![(format!("TNG/{}/STATE/UPD", device), self.state_report(device))]
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct FakeBroker {
    shared: Arc<Shared>,
}

impl FakeBroker {
    pub fn new(behavior: Behavior) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                behavior,
                calls: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(BTreeSet::new()),
                twin_state: Mutex::new(BTreeMap::new()),
                held_acks: Mutex::new(Vec::new()),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        }
    }

    pub fn with_twins(twins: &[&str]) -> Self {
        Self::new(Behavior {
            twins: twins.iter().map(|t| t.to_string()).collect(),
            ..Behavior::default()
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.shared.calls).clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Publish { topic, payload } => Some((topic, payload)),
                _ => None,
            })
            .collect()
    }

    pub fn active_subscriptions(&self) -> BTreeSet<String> {
        lock(&self.shared.subscriptions).clone()
    }

    /// Publishes as another client would
    pub fn inject(&self, topic: &str, payload: &str) {
        self.shared.route(topic, payload.as_bytes());
    }

    pub fn drop_connection(&self, reason: &str) {
        let _ = self
            .shared
            .events_tx
            .send(Err(ProbeError::ConnectionError(reason.to_string())));
    }

    pub fn config() -> BusConfig {
        BusConfig {
            client_id: "probe-test".to_string(),
            ..BusConfig::default()
        }
    }
}

#[async_trait]
impl Transport for FakeBroker {
    async fn connect(
        &self,
        config: &BusConfig,
    ) -> Result<(Arc<dyn BusHandle>, Box<dyn EventSource>)> {
        if self.shared.behavior.refuse_connect {
            return Err(ProbeError::ConnectionError(format!(
                "{} refused the connection",
                config.endpoint()
            )));
        }
        let rx = lock(&self.shared.events_rx).take().ok_or_else(|| {
            ProbeError::ConnectionError("fake broker accepts one connection".to_string())
        })?;
        Ok((
            Arc::new(FakeBus {
                shared: self.shared.clone(),
            }),
            Box::new(FakeEvents { rx }),
        ))
    }
}

struct FakeBus {
    shared: Arc<Shared>,
}

#[async_trait]
impl BusHandle for FakeBus {
    async fn subscribe(&self, filter: &str, _qos: QoS) -> Result<AckHandle> {
        self.shared.record(Call::Subscribe(filter.to_string()));
        let (tx, handle) = AckHandle::pending(format!("subscribe {}", filter));

        let shared = self.shared.clone();
        let filter = filter.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(shared.behavior.suback_delay).await;
            if shared.behavior.reject_filter.as_deref() == Some(filter.as_str()) {
                let _ = tx.send(Err("not authorised".to_string()));
                return;
            }
            lock(&shared.subscriptions).insert(filter.clone());
            shared.record(Call::SubAck(filter));
            let _ = tx.send(Ok(()));
        });
        Ok(handle)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _qos: QoS,
        _retain: bool,
    ) -> Result<DeliveryHandle> {
        self.shared.record(Call::Publish {
            topic: topic.to_string(),
            payload: payload.clone(),
        });
        let request = format!("publish {}", topic);
        if !self.shared.behavior.ack_publishes {
            let (tx, handle) = AckHandle::pending(request);
            lock(&self.shared.held_acks).push(tx);
            return Ok(handle);
        }

        self.shared.route(topic, &payload);
        let replies = self.shared.twin_replies(topic, &payload);
        if !replies.is_empty() {
            let shared = self.shared.clone();
            tokio::spawn(async move {
                tokio::time::sleep(TWIN_LATENCY).await;
                for (topic, payload) in replies {
                    shared.route(&topic, &payload);
                }
            });
        }
        Ok(AckHandle::acknowledged(request))
    }

    async fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.shared.record(Call::Unsubscribe(filter.to_string()));
        lock(&self.shared.subscriptions).remove(filter);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.shared.record(Call::Disconnect);
        let _ = self.shared.events_tx.send(Ok(SourceEvent::Closed));
        Ok(())
    }
}

struct FakeEvents {
    rx: EventRx,
}

#[async_trait]
impl EventSource for FakeEvents {
    async fn next_event(&mut self) -> Result<SourceEvent> {
        match self.rx.recv().await {
            Some(event) => event,
            None => Err(ProbeError::ChannelError("fake broker went away".to_string())),
        }
    }
}
