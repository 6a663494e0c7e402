use std::fmt;

use super::target::SEPARATOR;
use crate::error::{ProbeError, Result};

const SINGLE_LEVEL: &str = "+";
const MULTI_LEVEL: &str = "#";

/// A validated subscribe-side topic pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicFilter(String);

impl TopicFilter {
    /// Validates wildcard placement: `+` and `#` must occupy a whole level,
    /// and `#` may only be the last one.
    pub fn parse(filter: &str) -> Result<Self> {
        if filter.is_empty() {
            return Err(ProbeError::SubscriptionError(
                "topic filter is empty".to_string(),
            ));
        }

        let levels: Vec<&str> = filter.split(SEPARATOR).collect();
        let last = levels.len() - 1;
        for (idx, level) in levels.iter().enumerate() {
            if level.contains(MULTI_LEVEL) && (*level != MULTI_LEVEL || idx != last) {
                return Err(ProbeError::SubscriptionError(format!(
                    "'#' must be the whole final level in '{}'",
                    filter
                )));
            }
            if level.contains(SINGLE_LEVEL) && *level != SINGLE_LEVEL {
                return Err(ProbeError::SubscriptionError(format!(
                    "'+' must be a whole level in '{}'",
                    filter
                )));
            }
        }

        Ok(TopicFilter(filter.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, topic: &str) -> bool {
        if topic.is_empty() {
            return false;
        }
        // Wildcards in the first level never match broker-internal `$` topics
        let system = topic.starts_with('$');
        let mut filter_levels = self.0.split(SEPARATOR);
        let mut topic_levels = topic.split(SEPARATOR);
        let mut first = true;

        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some(MULTI_LEVEL), _) => return !(first && system),
                (Some(SINGLE_LEVEL), Some(_)) => {
                    if first && system {
                        return false;
                    }
                }
                (Some(f), Some(t)) => {
                    if f != t {
                        return false;
                    }
                }
                (None, None) => return true,
                _ => return false,
            }
            first = false;
        }
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(s: &str) -> TopicFilter {
        TopicFilter::parse(s).unwrap()
    }

    #[test]
    fn single_level_wildcard_matches_one_level() {
        let pongs = filter("TNG/+/TPC/PONG");
        assert!(pongs.matches("TNG/pico1/TPC/PONG"));
        assert!(pongs.matches("TNG/pico2/TPC/PONG"));
        assert!(!pongs.matches("TNG/pico1/TPC/PING"));
        assert!(!pongs.matches("TNG/a/b/TPC/PONG"));
    }

    #[test]
    fn multi_level_wildcard_includes_parent() {
        let all = filter("TNG/pico1/#");
        assert!(all.matches("TNG/pico1"));
        assert!(all.matches("TNG/pico1/STATE/UPD"));
        assert!(all.matches("TNG/pico1/LC/ON"));
        assert!(!all.matches("TNG/pico2/LC/ON"));
    }

    #[test]
    fn exact_filters_are_case_sensitive() {
        let ping = filter("GRP/ALL/TPC/PING");
        assert!(ping.matches("GRP/ALL/TPC/PING"));
        assert!(!ping.matches("grp/all/tpc/ping"));
        assert!(!ping.matches("GRP/ALL/TPC"));
    }

    #[test]
    fn leading_wildcards_skip_system_topics() {
        assert!(!filter("#").matches("$SYS/broker/uptime"));
        assert!(!filter("+/broker/uptime").matches("$SYS/broker/uptime"));
        assert!(filter("$SYS/#").matches("$SYS/broker/uptime"));
    }

    #[test]
    fn misplaced_wildcards_are_rejected() {
        for bad in ["", "TNG/#/LC", "TNG/pico#", "TNG/pi+co/LC"] {
            assert!(TopicFilter::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }
}
