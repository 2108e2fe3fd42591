//! Topic validation and filter matching
//!
//! Publish topics must be concrete names. Subscribe topics may carry the two
//! MQTT wildcards: `#` (multi-level, trailing only, on its own level) and `+`
//! (single-level, occupying an entire level). Both checks run before any
//! network call is attempted.

use crate::error::{PublishError, SubscriptionError};
use thiserror::Error;

pub const MULTI_LEVEL_WILDCARD: char = '#';
pub const SINGLE_LEVEL_WILDCARD: char = '+';
pub const LEVEL_SEPARATOR: char = '/';
pub const SYSTEM_TOPIC_PREFIX: char = '$';

/// Topic syntax violation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct TopicError {
    pub topic: String,
    pub reason: &'static str,
}

impl TopicError {
    fn new(topic: &str, reason: &'static str) -> Self {
        Self {
            topic: topic.to_string(),
            reason,
        }
    }
}

impl From<TopicError> for PublishError {
    fn from(err: TopicError) -> Self {
        PublishError::invalid_topic(err.topic, err.reason)
    }
}

impl From<TopicError> for SubscriptionError {
    fn from(err: TopicError) -> Self {
        SubscriptionError::invalid_topic(err.topic, err.reason)
    }
}

pub const EMPTY_TOPIC: &str = "Topic cannot be empty";
pub const PUBLISH_WILDCARD: &str = "Publish topic cannot contain wildcards (# or +)";
pub const PUBLISH_SYSTEM_TOPIC: &str = "Publish topic cannot start with $ (system topic)";
pub const MULTI_LEVEL_NOT_LAST: &str =
    "Multi-level wildcard # can only be used at the end of the topic";
pub const MULTI_LEVEL_NOT_OWN_LEVEL: &str =
    "Multi-level wildcard # must be preceded by / (e.g., topic/#)";
pub const SINGLE_LEVEL_PARTIAL: &str =
    "Single-level wildcard + must occupy an entire level (e.g., topic/+/subtopic)";

pub fn validate_publish_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::new(topic, EMPTY_TOPIC));
    }

    if topic.contains(MULTI_LEVEL_WILDCARD) || topic.contains(SINGLE_LEVEL_WILDCARD) {
        return Err(TopicError::new(topic, PUBLISH_WILDCARD));
    }

    if topic.starts_with(SYSTEM_TOPIC_PREFIX) {
        return Err(TopicError::new(topic, PUBLISH_SYSTEM_TOPIC));
    }

    Ok(())
}

pub fn validate_subscribe_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::new(topic, EMPTY_TOPIC));
    }

    if let Some(position) = topic.find(MULTI_LEVEL_WILDCARD) {
        if position != topic.len() - 1 {
            return Err(TopicError::new(topic, MULTI_LEVEL_NOT_LAST));
        }

        // '#' alone is the whole-tree filter; otherwise it needs its own level
        if position > 0 && !topic[..position].ends_with(LEVEL_SEPARATOR) {
            return Err(TopicError::new(topic, MULTI_LEVEL_NOT_OWN_LEVEL));
        }
    }

    if topic.contains(SINGLE_LEVEL_WILDCARD) {
        let partial = topic
            .split(LEVEL_SEPARATOR)
            .any(|level| level.contains(SINGLE_LEVEL_WILDCARD) && level != "+");
        if partial {
            return Err(TopicError::new(topic, SINGLE_LEVEL_PARTIAL));
        }
    }

    Ok(())
}

/// Check whether a concrete topic name matches a subscription filter
///
/// Filters starting with a wildcard never match `$`-prefixed system topics.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with(SYSTEM_TOPIC_PREFIX)
        && (filter.starts_with(MULTI_LEVEL_WILDCARD) || filter.starts_with(SINGLE_LEVEL_WILDCARD))
    {
        return false;
    }

    let mut filter_levels = filter.split(LEVEL_SEPARATOR);
    let mut topic_levels = topic.split(LEVEL_SEPARATOR);

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn publish_rejects_any_wildcard(
            prefix in "[a-z/]{0,10}",
            suffix in "[a-z/]{0,10}",
            wildcard in "[#+]"
        ) {
            let topic = format!("{prefix}{wildcard}{suffix}");
            let err = validate_publish_topic(&topic).unwrap_err();
            prop_assert_eq!(err.reason, PUBLISH_WILDCARD);
        }

        #[test]
        fn publish_accepts_plain_topics(topic in "[a-zA-Z0-9_/ -]{1,40}") {
            prop_assert!(validate_publish_topic(&topic).is_ok());
        }

        #[test]
        fn publish_rejects_system_topics(rest in "[a-z/]{0,20}") {
            let topic = format!("${rest}");
            prop_assert!(validate_publish_topic(&topic).is_err());
        }

        #[test]
        fn subscribe_rejects_hash_before_last(prefix in "[a-z/]{0,10}", suffix in "[a-z/]{1,10}") {
            let topic = format!("{prefix}#{suffix}");
            let err = validate_subscribe_topic(&topic).unwrap_err();
            prop_assert_eq!(err.reason, MULTI_LEVEL_NOT_LAST);
        }

        #[test]
        fn subscribe_accepts_trailing_hash_level(
            levels in prop::collection::vec("[a-z0-9]{1,8}", 0..5)
        ) {
            let mut topic = levels.join("/");
            if topic.is_empty() {
                topic.push('#');
            } else {
                topic.push_str("/#");
            }
            prop_assert!(validate_subscribe_topic(&topic).is_ok());
        }

        #[test]
        fn subscribe_rejects_partial_plus(level in "[a-z]{1,8}", before in any::<bool>()) {
            let partial = if before { format!("+{level}") } else { format!("{level}+") };
            let topic = format!("sensors/{partial}/temp");
            let err = validate_subscribe_topic(&topic).unwrap_err();
            prop_assert_eq!(err.reason, SINGLE_LEVEL_PARTIAL);
        }

        #[test]
        fn full_plus_filter_matches_same_depth(
            levels in prop::collection::vec("[a-z0-9]{1,8}", 1..6)
        ) {
            let topic = levels.join("/");
            let filter = vec!["+"; levels.len()].join("/");
            prop_assert!(topic_matches(&filter, &topic));
        }
    }

    #[test]
    fn test_publish_messages() {
        assert_eq!(validate_publish_topic("").unwrap_err().reason, EMPTY_TOPIC);
        assert_eq!(
            validate_publish_topic("a/+/b").unwrap_err().reason,
            PUBLISH_WILDCARD
        );
        assert_eq!(
            validate_publish_topic("$SYS/broker").unwrap_err().reason,
            PUBLISH_SYSTEM_TOPIC
        );
        assert!(validate_publish_topic("sensors/room-1/temperature").is_ok());
    }

    #[test]
    fn test_subscribe_examples() {
        assert!(validate_subscribe_topic("#").is_ok());
        assert!(validate_subscribe_topic("sensors/#").is_ok());
        assert!(validate_subscribe_topic("+").is_ok());
        assert!(validate_subscribe_topic("sensors/+/temperature").is_ok());
        assert!(validate_subscribe_topic("+/+/#").is_ok());
        assert!(validate_subscribe_topic("$SYS/#").is_ok());

        assert_eq!(
            validate_subscribe_topic("sensor/#/x").unwrap_err().reason,
            MULTI_LEVEL_NOT_LAST
        );
        assert_eq!(
            validate_subscribe_topic("sensors#").unwrap_err().reason,
            MULTI_LEVEL_NOT_OWN_LEVEL
        );
        assert_eq!(
            validate_subscribe_topic("sensors/temp+").unwrap_err().reason,
            SINGLE_LEVEL_PARTIAL
        );
        assert_eq!(validate_subscribe_topic("").unwrap_err().reason, EMPTY_TOPIC);
    }

    #[test]
    fn test_error_conversions() {
        let err: PublishError = validate_publish_topic("").unwrap_err().into();
        assert!(matches!(
            err,
            PublishError::InvalidTopic { ref reason, .. } if reason == EMPTY_TOPIC
        ));

        let err: SubscriptionError = validate_subscribe_topic("a/#/b").unwrap_err().into();
        assert!(matches!(
            err,
            SubscriptionError::InvalidTopic { ref topic, .. } if topic == "a/#/b"
        ));
    }

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("sensors/#", "sensors/room/temp"));
        assert!(topic_matches("sensors/#", "sensors"));
        assert!(topic_matches("sensors/+/temp", "sensors/room/temp"));
        assert!(!topic_matches("sensors/+/temp", "sensors/room/humidity"));
        assert!(!topic_matches("sensors/+", "sensors/room/temp"));
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("#", "$SYS/uptime"));
        assert!(topic_matches("$SYS/#", "$SYS/uptime"));
    }
}
