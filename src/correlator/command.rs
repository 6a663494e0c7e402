use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use rand::Rng;

use crate::addressing::{topics_for, Operation, Target, TopicSet};
use crate::codec::{self, fields, Fields};
use crate::error::Result;

/// One request to publish: what to do, to whom, and with which payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    operation: Operation,
    target: Target,
    payload: Option<Fields>,
}

impl Command {
    pub fn new(operation: Operation, target: Target, payload: Option<Fields>) -> Self {
        Command {
            operation,
            target,
            payload,
        }
    }

    /// `{"id": <id>}` to a device or group ping topic
    pub fn ping(target: Target, id: u32) -> Self {
        Self::new(Operation::Ping, target, Some(fields([("id", id.into())])))
    }

    /// `{"GET": 1}` asking a twin to report its state
    pub fn state_get(device: Target) -> Self {
        Self::new(
            Operation::StateGet,
            device,
            Some(fields([("GET", 1i64.into())])),
        )
    }

    /// `{"state": {"on": <on>}}`
    pub fn state_set(device: Target, on: bool) -> Self {
        Self::new(
            Operation::StateSet,
            device,
            Some(fields([("state", fields([("on", on.into())]).into())])),
        )
    }

    /// `{"source": <client id>, "on": true}`; members ignore their own requests
    pub fn group_on(group: Target, source: &str) -> Self {
        Self::new(
            Operation::GroupOn,
            group,
            Some(fields([("source", source.into()), ("on", true.into())])),
        )
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn payload(&self) -> Option<&Fields> {
        self.payload.as_ref()
    }

    pub fn topics(&self) -> Result<TopicSet> {
        topics_for(&self.target, self.operation)
    }

    /// Wire payload; a command without fields sends `{}`
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        match &self.payload {
            Some(payload) => codec::encode(payload),
            None => codec::encode(&Fields::new()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} to {}", self.operation, self.target)
    }
}

/// Ping ids for this process: random start, then counting up.
///
/// Ids only need to tell consecutive pings apart, so wrapping is harmless.
#[derive(Debug)]
pub struct PingSequence(AtomicU32);

impl PingSequence {
    pub fn starting_at(first: u32) -> Self {
        PingSequence(AtomicU32::new(first))
    }

    pub fn random() -> Self {
        Self::starting_at(rand::thread_rng().gen_range(0..1_000_000))
    }

    pub fn global() -> &'static PingSequence {
        static SEQUENCE: OnceLock<PingSequence> = OnceLock::new();
        SEQUENCE.get_or_init(PingSequence::random)
    }

    pub fn next_id(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}
