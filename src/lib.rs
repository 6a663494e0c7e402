//! # twinprobe
//!
//! Command-line probes for IoT digital twins on an MQTT bus. Each probe
//! performs one request: subscribe to the response topics, publish a JSON
//! command, listen for a bounded window, exit.
//!
//! ```text
//! Command ──► addressing ──► TopicSet
//!    │                          │
//!    └──► codec ──► payload     ▼
//!                    Session (subscribe, then publish) ◄──► broker
//!                          │
//!                          ▼
//!                 CollectionWindow ──► Outcome
//! ```
//!
//! Topic layout: `TNG/<device>/...` addresses one twin, `GRP/<group>/...`
//! a broadcast group.

pub mod addressing;
pub mod cli;
pub mod codec;
pub mod config;
pub mod correlator;
pub mod error;
pub mod mqtt;

pub use error::{ProbeError, Result};
