use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubAck, SubscribeReasonCode,
};
use tracing::{debug, error, info, warn};

use super::config::BusConfig;
use super::message::InboundMessage;
use super::transport::{
    AckHandle, AckResult, BusHandle, DeliveryHandle, EventSource, SourceEvent, Transport,
};
use crate::error::{ProbeError, Result};

type AckSender = tokio::sync::oneshot::Sender<AckResult>;

/// Transport backed by a real broker connection through `rumqttc`
#[derive(Debug, Default, Clone, Copy)]
pub struct MqttTransport;

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(
        &self,
        config: &BusConfig,
    ) -> Result<(Arc<dyn BusHandle>, Box<dyn EventSource>)> {
        config.validate()?;

        let mut mqtt_options =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        mqtt_options
            .set_keep_alive(config.keep_alive())
            .set_clean_session(true);
        if let Some((user, password)) = config.credentials() {
            mqtt_options.set_credentials(user, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, config.channel_capacity);

        info!("Connecting to MQTT broker at {}", config.endpoint());
        match tokio::time::timeout(config.connect_timeout(), wait_for_connack(&mut eventloop))
            .await
        {
            Ok(Ok(())) => info!("Connected to {} as {}", config.endpoint(), config.client_id),
            Ok(Err(e)) => {
                error!("Connection to {} failed: {}", config.endpoint(), e);
                return Err(e);
            }
            Err(_) => {
                error!("No CONNACK from {}", config.endpoint());
                return Err(ProbeError::ConnectionError(format!(
                    "no CONNACK from {} within {:?}",
                    config.endpoint(),
                    config.connect_timeout()
                )));
            }
        }

        let acks = AckRegistry::default();
        let handler = MqttHandler {
            client,
            acks: acks.clone(),
            request_lock: tokio::sync::Mutex::new(()),
        };
        let events = MqttEvents { eventloop, acks };
        Ok((Arc::new(handler), Box::new(events)))
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(ProbeError::ConnectionError(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(event) => debug!("Event before CONNACK: {:?}", event),
            Err(e) => return Err(ProbeError::ConnectionError(e.to_string())),
        }
    }
}

/// Correlates requests with the packet ids `rumqttc` assigns to them.
///
/// The client handle does not reveal packet ids; the event loop reports them
/// as `Outgoing` events in request order. Waiters queue up in that order and
/// move into `in_flight` once their id is known.
#[derive(Default)]
struct AckQueues {
    subscribes: VecDeque<AckSender>,
    publishes: VecDeque<(QoS, AckSender)>,
    in_flight: HashMap<u16, AckSender>,
}

#[derive(Default, Clone)]
struct AckRegistry(Arc<Mutex<AckQueues>>);

impl AckRegistry {
    fn lock(&self) -> MutexGuard<'_, AckQueues> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn expect_subscribe(&self, tx: AckSender) {
        self.lock().subscribes.push_back(tx);
    }

    fn cancel_last_subscribe(&self) {
        self.lock().subscribes.pop_back();
    }

    fn expect_publish(&self, qos: QoS, tx: AckSender) {
        self.lock().publishes.push_back((qos, tx));
    }

    fn cancel_last_publish(&self) {
        self.lock().publishes.pop_back();
    }

    fn outgoing_subscribe(&self, pkid: u16) {
        let mut guard = self.lock();
        let queues = &mut *guard;
        match queues.subscribes.pop_front() {
            Some(tx) => {
                queues.in_flight.insert(pkid, tx);
            }
            None => warn!("Outgoing SUBSCRIBE {} without a waiter", pkid),
        }
    }

    fn outgoing_publish(&self, pkid: u16) {
        let mut guard = self.lock();
        let queues = &mut *guard;
        match queues.publishes.pop_front() {
            // QoS 0 is complete once written
            Some((QoS::AtMostOnce, tx)) => {
                let _ = tx.send(Ok(()));
            }
            Some((_, tx)) => {
                queues.in_flight.insert(pkid, tx);
            }
            None => warn!("Outgoing PUBLISH {} without a waiter", pkid),
        }
    }

    fn suback(&self, ack: &SubAck) {
        let verdict = if ack
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
        {
            Err("broker rejected the filter".to_string())
        } else {
            Ok(())
        };
        self.resolve(ack.pkid, verdict);
    }

    fn resolve(&self, pkid: u16, verdict: AckResult) {
        match self.lock().in_flight.remove(&pkid) {
            Some(tx) => {
                let _ = tx.send(verdict);
            }
            None => debug!("Acknowledgement for unknown packet {}", pkid),
        }
    }

    fn fail_all(&self, reason: &str) {
        let mut guard = self.lock();
        let queues = &mut *guard;
        let waiters = queues
            .subscribes
            .drain(..)
            .chain(queues.publishes.drain(..).map(|(_, tx)| tx))
            .collect::<Vec<_>>();
        for tx in waiters.into_iter().chain(queues.in_flight.drain().map(|(_, tx)| tx)) {
            let _ = tx.send(Err(reason.to_string()));
        }
    }
}

/// Request half of a broker connection
pub struct MqttHandler {
    client: AsyncClient,
    acks: AckRegistry,
    // Keeps waiter order identical to the order requests reach the event loop
    request_lock: tokio::sync::Mutex<()>,
}

#[async_trait]
impl BusHandle for MqttHandler {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<AckHandle> {
        let _guard = self.request_lock.lock().await;
        let (tx, handle) = AckHandle::pending(format!("subscribe {}", filter));
        self.acks.expect_subscribe(tx);
        if let Err(e) = self.client.subscribe(filter, qos).await {
            self.acks.cancel_last_subscribe();
            return Err(ProbeError::SubscriptionError(format!(
                "failed to request {}: {}",
                filter, e
            )));
        }
        Ok(handle)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<DeliveryHandle> {
        let _guard = self.request_lock.lock().await;
        let (tx, handle) = AckHandle::pending(format!("publish {}", topic));
        self.acks.expect_publish(qos, tx);
        if let Err(e) = self.client.publish(topic, qos, retain, payload).await {
            self.acks.cancel_last_publish();
            return Err(ProbeError::ConnectionError(format!(
                "failed to publish to {}: {}",
                topic, e
            )));
        }
        Ok(handle)
    }

    async fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.client
            .unsubscribe(filter)
            .await
            .map_err(|e| ProbeError::ConnectionError(format!("unsubscribe {}: {}", filter, e)))
    }

    async fn disconnect(&self) -> Result<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| ProbeError::ConnectionError(format!("disconnect: {}", e)))
    }
}

/// Event half of a broker connection
pub struct MqttEvents {
    eventloop: EventLoop,
    acks: AckRegistry,
}

#[async_trait]
impl EventSource for MqttEvents {
    async fn next_event(&mut self) -> Result<SourceEvent> {
        loop {
            let event = match self.eventloop.poll().await {
                Ok(event) => event,
                Err(e) => {
                    let reason = e.to_string();
                    self.acks.fail_all(&reason);
                    return Err(ProbeError::ConnectionError(reason));
                }
            };

            match event {
                Event::Incoming(Packet::Publish(publish)) => {
                    let mut message =
                        InboundMessage::from_topic(publish.topic, publish.payload.to_vec())
                            .retained(publish.retain);
                    if publish.qos != QoS::AtMostOnce {
                        message = message.with_delivery(publish.pkid, publish.dup);
                    }
                    return Ok(SourceEvent::Message(message));
                }
                Event::Incoming(Packet::ConnAck(ack)) => {
                    if ack.code == ConnectReturnCode::Success {
                        return Ok(SourceEvent::Connected);
                    }
                    let reason = format!("broker refused reconnection: {:?}", ack.code);
                    self.acks.fail_all(&reason);
                    return Err(ProbeError::ConnectionError(reason));
                }
                Event::Incoming(Packet::SubAck(ack)) => self.acks.suback(&ack),
                Event::Incoming(Packet::PubAck(ack)) => self.acks.resolve(ack.pkid, Ok(())),
                Event::Incoming(Packet::PubComp(comp)) => self.acks.resolve(comp.pkid, Ok(())),
                Event::Outgoing(Outgoing::Subscribe(pkid)) => self.acks.outgoing_subscribe(pkid),
                Event::Outgoing(Outgoing::Publish(pkid)) => self.acks.outgoing_publish(pkid),
                Event::Outgoing(Outgoing::Disconnect) => {
                    self.acks.fail_all("session closed");
                    return Ok(SourceEvent::Closed);
                }
                other => debug!("MQTT event: {:?}", other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_waiters_follow_packet_ids() {
        let acks = AckRegistry::default();
        let (tx_a, first) = AckHandle::pending("publish a");
        let (tx_b, second) = AckHandle::pending("publish b");
        acks.expect_publish(QoS::AtLeastOnce, tx_a);
        acks.expect_publish(QoS::AtLeastOnce, tx_b);

        acks.outgoing_publish(7);
        acks.outgoing_publish(8);
        acks.resolve(8, Ok(()));

        assert!(second.await_ack(Duration::from_millis(50)).await.is_ok());
        assert!(matches!(
            first.await_ack(Duration::from_millis(50)).await,
            Err(ProbeError::PublishTimeout(_))
        ));
    }

    #[tokio::test]
    async fn qos0_publish_completes_when_written() {
        let acks = AckRegistry::default();
        let (tx, handle) = AckHandle::pending("publish a");
        acks.expect_publish(QoS::AtMostOnce, tx);
        acks.outgoing_publish(0);
        assert!(handle.await_ack(Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn rejected_suback_fails_the_waiter() {
        let acks = AckRegistry::default();
        let (tx, handle) = AckHandle::pending("subscribe TNG/#");
        acks.expect_subscribe(tx);
        acks.outgoing_subscribe(3);
        acks.suback(&SubAck::new(3, vec![SubscribeReasonCode::Failure]));
        assert!(matches!(
            handle.await_ack(Duration::from_millis(50)).await,
            Err(ProbeError::ConnectionError(_))
        ));
    }

    #[tokio::test]
    async fn connection_loss_fails_everything_pending() {
        let acks = AckRegistry::default();
        let (tx_sub, sub) = AckHandle::pending("subscribe TNG/#");
        let (tx_pub, publ) = AckHandle::pending("publish a");
        acks.expect_subscribe(tx_sub);
        acks.expect_publish(QoS::AtLeastOnce, tx_pub);
        acks.outgoing_publish(1);

        acks.fail_all("connection reset");

        assert!(sub.await_ack(Duration::from_millis(50)).await.is_err());
        assert!(publ.await_ack(Duration::from_millis(50)).await.is_err());
    }
}
