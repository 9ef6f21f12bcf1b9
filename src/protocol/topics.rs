//! Topic filter matching and validation
//!
//! Filters use the MQTT hierarchy: levels separated by `/`, `+` standing for exactly one
//! level and `#` standing for any number of trailing levels.
//!
//! A filter consisting of a lone `+` matches every topic, not only single-level ones. This
//! broader reading is the contract of this crate and is covered by tests.

use thiserror::Error;

pub const LEVEL_SEPARATOR: char = '/';
pub const SINGLE_LEVEL_WILDCARD: &str = "+";
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// Check whether `topic` is selected by `filter`
///
/// # Examples
/// ```
/// use mqtt_dispatch::protocol::topic_matches;
///
/// assert!(topic_matches("sport/tennis/player", "sport/+/player"));
/// assert!(topic_matches("sport", "sport/#"));
/// assert!(!topic_matches("sport/tennis/player/ranking", "sport/+/player"));
/// ```
pub fn topic_matches(topic: &str, filter: &str) -> bool {
    if filter == MULTI_LEVEL_WILDCARD || filter == SINGLE_LEVEL_WILDCARD {
        return true;
    }

    if topic == filter {
        return true;
    }

    let mut topic_levels = topic.split(LEVEL_SEPARATOR);
    let mut filter_levels = filter.split(LEVEL_SEPARATOR);

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            // `#` swallows the rest, including the parent level itself
            (Some(MULTI_LEVEL_WILDCARD), _) => return true,
            (Some(SINGLE_LEVEL_WILDCARD), Some(_)) => {}
            (Some(filter_level), Some(topic_level)) => {
                if filter_level != topic_level {
                    return false;
                }
            }
            (None, None) => return true,
            (None, Some(_)) | (Some(_), None) => return false,
        }
    }
}

/// Reasons a topic or filter is rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("Topic or filter cannot be empty")]
    Empty,
    #[error("Multi-level wildcard '#' must be the last level: {0}")]
    MultiLevelNotLast(String),
    #[error("Wildcard must occupy a whole level: {0}")]
    PartialLevelWildcard(String),
    #[error("Topic names cannot contain wildcards: {0}")]
    WildcardInTopic(String),
}

/// Validate subscription filter syntax
pub fn validate_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }

    let mut levels = filter.split(LEVEL_SEPARATOR).peekable();
    while let Some(level) = levels.next() {
        if level == MULTI_LEVEL_WILDCARD {
            if levels.peek().is_some() {
                return Err(TopicError::MultiLevelNotLast(filter.to_string()));
            }
        } else if level != SINGLE_LEVEL_WILDCARD && (level.contains('+') || level.contains('#')) {
            return Err(TopicError::PartialLevelWildcard(filter.to_string()));
        }
    }

    Ok(())
}

/// Validate a topic name used for publishing
pub fn validate_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.contains(['+', '#']) {
        return Err(TopicError::WildcardInTopic(topic.to_string()));
    }
    Ok(())
}
