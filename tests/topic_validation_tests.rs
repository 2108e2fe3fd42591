//! Topic syntax rules for publish topics and subscription filters

use mqtt_factory::protocol::topics::{
    self, topic_matches, validate_publish_topic, validate_subscribe_topic,
};
use proptest::prelude::*;

#[test]
fn test_publish_topics() {
    for topic in ["sensors/kitchen", "a", "a/b/c", "/leading", "trailing/", "spaces ok/x"] {
        assert!(validate_publish_topic(topic).is_ok(), "{topic} should be valid");
    }

    assert_eq!(validate_publish_topic("").unwrap_err().reason, topics::EMPTY_TOPIC);
    assert_eq!(
        validate_publish_topic("a/+/b").unwrap_err().reason,
        topics::PUBLISH_WILDCARD
    );
    assert_eq!(
        validate_publish_topic("a/#").unwrap_err().reason,
        topics::PUBLISH_WILDCARD
    );
    assert_eq!(
        validate_publish_topic("$SYS/broker").unwrap_err().reason,
        topics::PUBLISH_SYSTEM_TOPIC
    );
}

#[test]
fn test_subscribe_filters() {
    for filter in ["#", "sensors/#", "+", "+/temp", "a/+/b/#", "$SYS/#", "a//b"] {
        assert!(validate_subscribe_topic(filter).is_ok(), "{filter} should be valid");
    }

    for filter in ["", "sensor/#/x", "a#", "a/b#", "a/+b", "+a/b", "a/b+/c"] {
        assert!(validate_subscribe_topic(filter).is_err(), "{filter} should be invalid");
    }
}

#[test]
fn test_filter_matching() {
    assert!(topic_matches("sensors/+", "sensors/kitchen"));
    assert!(!topic_matches("sensors/+", "sensors/kitchen/temp"));
    assert!(topic_matches("sensors/#", "sensors/kitchen/temp"));
    assert!(topic_matches("sensors/#", "sensors"));
    assert!(topic_matches("#", "anything/at/all"));
    assert!(!topic_matches("#", "$SYS/uptime"));
    assert!(!topic_matches("+/uptime", "$SYS/uptime"));
    assert!(topic_matches("$SYS/#", "$SYS/uptime"));
    assert!(topic_matches("a/b", "a/b"));
    assert!(!topic_matches("a/b", "a/c"));
}

fn level() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,6}"
}

proptest! {
    #[test]
    fn plain_topics_are_valid_everywhere(levels in prop::collection::vec(level(), 1..5)) {
        let topic = levels.join("/");
        prop_assert!(validate_publish_topic(&topic).is_ok());
        prop_assert!(validate_subscribe_topic(&topic).is_ok());
        prop_assert!(topic_matches(&topic, &topic));
    }

    #[test]
    fn trailing_multi_level_wildcard_is_valid(levels in prop::collection::vec(level(), 0..4)) {
        let mut parts = levels.clone();
        parts.push("#".to_string());
        let filter = parts.join("/");
        prop_assert!(validate_subscribe_topic(&filter).is_ok());
        prop_assert!(validate_publish_topic(&filter).is_err());
    }

    #[test]
    fn non_final_multi_level_wildcard_is_invalid(
        before in prop::collection::vec(level(), 0..3),
        after in prop::collection::vec(level(), 1..3)
    ) {
        let mut parts = before.clone();
        parts.push("#".to_string());
        parts.extend(after);
        prop_assert!(validate_subscribe_topic(&parts.join("/")).is_err());
    }

    #[test]
    fn partial_single_level_wildcard_is_invalid(prefix in level(), rest in level()) {
        let filter = format!("{prefix}+/{rest}");
        prop_assert!(validate_subscribe_topic(&filter).is_err());
        prop_assert!(validate_publish_topic(&filter).is_err());
    }
}
