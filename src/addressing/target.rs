use std::fmt;
use std::str::FromStr;

use crate::error::{ProbeError, Result};

/// Level separator of the topic hierarchy
pub const SEPARATOR: char = '/';

/// Group every twin listens on
pub const ALL_GROUP: &str = "ALL";

/// Group used by the LED broadcast request when no group is named
pub const LED_GROUP: &str = "LED";

/// Recipient of a command: one twin or a broadcast group
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    Device(String),
    Group(String),
}

impl Target {
    pub fn device(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id("device", &id)?;
        Ok(Target::Device(id))
    }

    pub fn group(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id("group", &id)?;
        Ok(Target::Group(id))
    }

    pub fn all() -> Self {
        Target::Group(ALL_GROUP.to_string())
    }

    pub fn id(&self) -> &str {
        match self {
            Target::Device(id) | Target::Group(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Target::Device(_) => "device",
            Target::Group(_) => "group",
        }
    }

    /// Re-checks the id, for targets built directly from the enum variants
    pub fn validate(&self) -> Result<()> {
        validate_id(self.kind(), self.id())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.id())
    }
}

// Wildcards are rejected too: a publish topic may never contain them.
fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ProbeError::InvalidTarget(format!("{} id is empty", kind)));
    }
    if let Some(bad) = id.chars().find(|c| *c == SEPARATOR || *c == '+' || *c == '#') {
        return Err(ProbeError::InvalidTarget(format!(
            "{} id '{}' contains reserved character '{}'",
            kind, id, bad
        )));
    }
    Ok(())
}

/// The fixed set of requests a probe can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Ping,
    StateGet,
    StateSet,
    GroupOn,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Ping,
        Operation::StateGet,
        Operation::StateSet,
        Operation::GroupOn,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Ping => "PING",
            Operation::StateGet => "STATE_GET",
            Operation::StateSet => "STATE_SET",
            Operation::GroupOn => "GROUP_ON",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Operation::ALL
            .into_iter()
            .find(|op| op.name() == normalized)
            .ok_or_else(|| ProbeError::UnsupportedOperation(format!("unknown operation '{}'", s)))
    }
}
