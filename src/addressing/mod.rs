//! # Topic Addressing
//!
//! Maps a logical recipient and an operation onto concrete MQTT topics.
//!
//! ```text
//! TNG/<device>/TPC/PING      ping request to one twin
//! TNG/<device>/TPC/PONG      its answer
//! TNG/<device>/LC/<event>    lifecycle (online, offline, keep-alive)
//! TNG/<device>/STATE/GET     state query
//! TNG/<device>/STATE/SET     state update
//! GRP/<group>/TPC/...        broadcast to every member of a group
//! ```
//!
//! Resolution is pure: the same target and operation always yield the same
//! publish topic and the same filter set.

pub mod filter;
pub mod target;

pub use filter::TopicFilter;
pub use target::{Operation, Target, ALL_GROUP, LED_GROUP, SEPARATOR};

use std::collections::BTreeSet;

use crate::error::{ProbeError, Result};

/// Root level for device (twin) addressed topics
pub const THING_ROOT: &str = "TNG";

/// Root level for group addressed topics
pub const GROUP_ROOT: &str = "GRP";

/// Where a command is published and which filters carry its responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    pub publish: String,
    pub subscribe: BTreeSet<String>,
}

impl TopicSet {
    fn new<const N: usize>(publish: String, subscribe: [String; N]) -> Self {
        TopicSet {
            publish,
            subscribe: subscribe.into_iter().collect(),
        }
    }

    pub fn filters(&self) -> Result<Vec<TopicFilter>> {
        self.subscribe
            .iter()
            .map(|f| TopicFilter::parse(f))
            .collect()
    }
}

fn topic(levels: &[&str]) -> String {
    levels.join("/")
}

/// Resolves the publish topic and response filters for `operation` on `target`
pub fn topics_for(target: &Target, operation: Operation) -> Result<TopicSet> {
    target.validate()?;

    let set = match (operation, target) {
        (Operation::Ping, Target::Device(d)) => {
            let ping = topic(&[THING_ROOT, d, "TPC", "PING"]);
            TopicSet::new(
                ping.clone(),
                [
                    ping,
                    topic(&[THING_ROOT, d, "TPC", "PONG"]),
                    topic(&[THING_ROOT, d, "LC", "#"]),
                ],
            )
        }
        (Operation::Ping, Target::Group(g)) => {
            let ping = topic(&[GROUP_ROOT, g, "TPC", "PING"]);
            TopicSet::new(ping.clone(), [ping, topic(&[THING_ROOT, "+", "TPC", "PONG"])])
        }
        (Operation::StateGet, Target::Device(d)) => TopicSet::new(
            topic(&[THING_ROOT, d, "STATE", "GET"]),
            [topic(&[THING_ROOT, d, "#"])],
        ),
        (Operation::StateSet, Target::Device(d)) => TopicSet::new(
            topic(&[THING_ROOT, d, "STATE", "SET"]),
            [topic(&[THING_ROOT, d, "#"])],
        ),
        // Deliberately fleet-wide, to watch every twin react to the broadcast
        (Operation::GroupOn, Target::Group(g)) => TopicSet::new(
            topic(&[GROUP_ROOT, g, "TPC", "req"]),
            [topic(&[THING_ROOT, "#"]), topic(&[GROUP_ROOT, "#"])],
        ),
        (op, target) => {
            return Err(ProbeError::UnsupportedOperation(format!(
                "{} is not supported for {}",
                op, target
            )))
        }
    };

    Ok(set)
}
