//! Pairs an outbound command with the responses it provokes.
//!
//! 1. [`command`] - Commands and their payloads, ping id sequence
//! 2. [`exchange`] - Statum state machine driving one request
//! 3. [`window`] - Time-bounded, filter-matched response intake
//! 4. [`response`] - Interpretation of collected messages
//!
//! # Architecture
//!
//! ```text
//! Command ──► Exchange<Preparing> ──► Session.subscribe ──► Session.publish
//!                                           │
//!             CollectionWindow ◄── receive loop (EventSink)
//!                    │
//!                    ▼
//!                 Outcome
//! ```

pub mod command;
pub mod exchange;
pub mod response;
pub mod window;

pub use command::{Command, PingSequence};
pub use exchange::{run_exchange, Exchange, ExchangeState, Outcome};
pub use response::Response;
pub use window::{CloseReason, CollectedEntry, CollectionWindow, MalformedEntry, WindowStats};
