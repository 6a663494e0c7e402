use crate::addressing::{GROUP_ROOT, SEPARATOR, THING_ROOT};
use crate::codec::{Field, Fields};

/// What a collected message means for the probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `TNG/<device>/TPC/PONG`
    Pong { device: String, id: Option<i64> },
    /// `TNG/<device>/LC/<event>`, e.g. ON, OFF, KEEP
    Lifecycle { device: String, event: String },
    /// Any other `TNG/<device>/STATE/...` report
    State { device: String, state: Fields },
    /// A request seen on the bus, including our own
    Echo { topic: String },
    Other { topic: String },
}

impl Response {
    pub fn classify(topic: &str, fields: &Fields) -> Self {
        let levels: Vec<&str> = topic.split(SEPARATOR).collect();
        match levels.as_slice() {
            [THING_ROOT, device, "TPC", "PONG"] => Response::Pong {
                device: device.to_string(),
                id: fields.get("id").and_then(Field::as_int),
            },
            [THING_ROOT, _, "TPC", "PING"] | [THING_ROOT, _, "STATE", "GET" | "SET"] => {
                Response::Echo {
                    topic: topic.to_string(),
                }
            }
            [GROUP_ROOT, ..] => Response::Echo {
                topic: topic.to_string(),
            },
            [THING_ROOT, device, "LC", event] => Response::Lifecycle {
                device: device.to_string(),
                event: event.to_string(),
            },
            [THING_ROOT, device, "STATE", _] => Response::State {
                device: device.to_string(),
                state: fields
                    .get("state")
                    .and_then(Field::as_map)
                    .cloned()
                    .unwrap_or_else(|| fields.clone()),
            },
            _ => Response::Other {
                topic: topic.to_string(),
            },
        }
    }
}
