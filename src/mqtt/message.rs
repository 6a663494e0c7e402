use chrono::{DateTime, Local};
use std::fmt;

const PREVIEW_LEN: usize = 60;

/// A message delivered by the broker on one of our subscriptions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    topic: String,
    payload: Vec<u8>,
    received_at: DateTime<Local>,
    packet_id: Option<u16>,
    duplicate: bool,
    retain: bool,
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} - {}: {}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            self.preview()
        )
    }
}

impl InboundMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
            packet_id: None,
            duplicate: false,
            retain: false,
        }
    }

    /// Attaches the QoS>0 packet id and the broker's redelivery flag
    pub fn with_delivery(mut self, packet_id: u16, duplicate: bool) -> Self {
        self.packet_id = Some(packet_id);
        self.duplicate = duplicate;
        self
    }

    pub fn retained(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn received_at(&self) -> DateTime<Local> {
        self.received_at
    }

    pub fn packet_id(&self) -> Option<u16> {
        self.packet_id
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate
    }

    pub fn is_retained(&self) -> bool {
        self.retain
    }

    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    fn preview(&self) -> String {
        let text = self.payload_text();
        match text.char_indices().nth(PREVIEW_LEN) {
            Some((cut, _)) => format!("{}...", &text[..cut]),
            None => text,
        }
    }

    pub fn render(&self) -> String {
        format!("Rcv topic={} msg={}", self.topic, self.payload_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_shortens_long_payloads() {
        let long = "x".repeat(200);
        let message = InboundMessage::from_topic("TNG/pico1/STATE/UPD", long);
        let shown = message.to_string();
        assert!(shown.contains("TNG/pico1/STATE/UPD"));
        assert!(shown.ends_with("..."));
        assert!(shown.len() < 120);
    }

    #[test]
    fn render_matches_probe_output() {
        let message = InboundMessage::from_topic("TNG/pico1/TPC/PONG", r#"{"id":7}"#);
        assert_eq!(message.render(), r#"Rcv topic=TNG/pico1/TPC/PONG msg={"id":7}"#);
    }
}
