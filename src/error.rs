//! Error taxonomy for the MQTT connection factory
//!
//! Four domain error families cover every failure the factory can surface:
//!
//! - [`ConfigurationError`] - raised before any network attempt
//! - [`ConnectionError`] - raised after a network attempt was made
//! - [`PublishError`] - topic, serialization and publish failures
//! - [`SubscriptionError`] - topic, handler and subscribe failures
//!
//! Transport failures are wrapped with the connection name, topic and a
//! sanitized reason string while the original error is kept as the source.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Boxed engine-side cause kept in the `source()` chain.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Key/value context attached to an error for structured logging.
pub type ErrorContext = Vec<(&'static str, String)>;

/// Configuration errors - always detected before touching the network
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("MQTT connection '{connection}' not found in configuration")]
    ConnectionNotFound { connection: String },

    #[error("Missing required parameter '{parameter}' for MQTT connection '{connection}'")]
    MissingParameter {
        connection: String,
        parameter: String,
    },

    #[error("Invalid configuration for MQTT connection '{connection}': {reason}")]
    InvalidConfiguration { connection: String, reason: String },

    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl ConfigurationError {
    pub fn connection_not_found<S: Into<String>>(connection: S) -> Self {
        Self::ConnectionNotFound {
            connection: connection.into(),
        }
    }

    pub fn missing_parameter<S: Into<String>, P: Into<String>>(
        connection: S,
        parameter: P,
    ) -> Self {
        Self::MissingParameter {
            connection: connection.into(),
            parameter: parameter.into(),
        }
    }

    pub fn invalid<S: Into<String>, R: Into<String>>(connection: S, reason: R) -> Self {
        Self::InvalidConfiguration {
            connection: connection.into(),
            reason: reason.into(),
        }
    }

    pub fn context(&self) -> ErrorContext {
        match self {
            Self::ConnectionNotFound { connection } => vec![("connection", connection.clone())],
            Self::MissingParameter {
                connection,
                parameter,
            } => vec![
                ("connection", connection.clone()),
                ("parameter", parameter.clone()),
            ],
            Self::InvalidConfiguration { connection, reason } => vec![
                ("connection", connection.clone()),
                ("reason", reason.clone()),
            ],
            Self::FileRead(e) => vec![("reason", e.to_string())],
            Self::TomlParse(e) => vec![("reason", e.to_string())],
        }
    }
}

/// Connection errors - the engine was asked to do something and failed
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to connect to MQTT broker '{connection}' at {host}:{port}: {reason}")]
    FailedToConnect {
        connection: String,
        host: String,
        port: u16,
        reason: String,
        #[source]
        source: BoxError,
    },

    #[error(
        "Authentication failed for MQTT connection '{connection}' at {host}:{port} \
         with username '{username}': {reason}"
    )]
    AuthenticationFailed {
        connection: String,
        host: String,
        port: u16,
        username: String,
        reason: String,
        #[source]
        source: BoxError,
    },

    #[error(
        "Connection timeout for MQTT connection '{connection}' at {host}:{port} \
         after {timeout} seconds"
    )]
    ConnectionTimeout {
        connection: String,
        host: String,
        port: u16,
        timeout: u64,
        reason: String,
        #[source]
        source: BoxError,
    },

    #[error("MQTT connection '{connection}' lost unexpectedly")]
    ConnectionLost { connection: String },

    #[error("Failed to reconnect to MQTT broker '{connection}' after {attempts} attempts")]
    ReconnectionFailed { connection: String, attempts: u32 },

    #[error("Failed to interrupt MQTT client '{connection}': {reason}")]
    InterruptFailed {
        connection: String,
        reason: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to disconnect from MQTT broker '{connection}': {reason}")]
    DisconnectFailed {
        connection: String,
        reason: String,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl ConnectionError {
    /// Wrap an engine connect failure, keeping the cause in the source chain
    pub fn failed_to_connect<E>(connection: &str, host: &str, port: u16, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::FailedToConnect {
            connection: connection.to_string(),
            host: host.to_string(),
            port,
            reason: sanitize_reason(&source.to_string()),
            source: Box::new(source),
        }
    }

    pub fn authentication_failed<E>(
        connection: &str,
        host: &str,
        port: u16,
        username: &str,
        source: E,
    ) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::AuthenticationFailed {
            connection: connection.to_string(),
            host: host.to_string(),
            port,
            username: username.to_string(),
            reason: sanitize_reason(&source.to_string()),
            source: Box::new(source),
        }
    }

    pub fn connection_timeout<E>(
        connection: &str,
        host: &str,
        port: u16,
        timeout: u64,
        source: E,
    ) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ConnectionTimeout {
            connection: connection.to_string(),
            host: host.to_string(),
            port,
            timeout,
            reason: sanitize_reason(&source.to_string()),
            source: Box::new(source),
        }
    }

    /// Broker address for errors raised by a connect attempt
    pub fn broker(&self) -> Option<(&str, u16)> {
        match self {
            Self::FailedToConnect { host, port, .. }
            | Self::AuthenticationFailed { host, port, .. }
            | Self::ConnectionTimeout { host, port, .. } => Some((host.as_str(), *port)),
            _ => None,
        }
    }

    pub fn context(&self) -> ErrorContext {
        match self {
            Self::FailedToConnect {
                connection,
                host,
                port,
                reason,
                ..
            } => vec![
                ("connection", connection.clone()),
                ("host", host.clone()),
                ("port", port.to_string()),
                ("reason", reason.clone()),
            ],
            Self::AuthenticationFailed {
                connection,
                host,
                port,
                username,
                reason,
                ..
            } => vec![
                ("connection", connection.clone()),
                ("host", host.clone()),
                ("port", port.to_string()),
                ("username", username.clone()),
                ("reason", reason.clone()),
            ],
            Self::ConnectionTimeout {
                connection,
                host,
                port,
                timeout,
                reason,
                ..
            } => vec![
                ("connection", connection.clone()),
                ("host", host.clone()),
                ("port", port.to_string()),
                ("timeout", timeout.to_string()),
                ("reason", reason.clone()),
            ],
            Self::ConnectionLost { connection } => vec![("connection", connection.clone())],
            Self::ReconnectionFailed {
                connection,
                attempts,
            } => vec![
                ("connection", connection.clone()),
                ("attempts", attempts.to_string()),
            ],
            Self::InterruptFailed {
                connection, reason, ..
            }
            | Self::DisconnectFailed {
                connection, reason, ..
            } => vec![
                ("connection", connection.clone()),
                ("reason", reason.clone()),
            ],
            Self::Configuration(e) => e.context(),
        }
    }
}

/// Publish errors
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Invalid publish topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("Failed to serialize message: {reason}")]
    SerializationFailed { kind: String, reason: String },

    #[error("Message has no topic; set one with to_topic() or use publish_to()")]
    MissingTopic,

    #[error("Failed to publish message to topic '{topic}' on connection '{connection}': {reason}")]
    PublishFailed {
        topic: String,
        connection: String,
        reason: String,
        #[source]
        source: BoxError,
    },

    #[error(
        "Publish timeout for topic '{topic}' on connection '{connection}' \
         after {timeout} seconds"
    )]
    PublishTimeout {
        topic: String,
        connection: String,
        timeout: u64,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl PublishError {
    pub fn invalid_topic<T: Into<String>, R: Into<String>>(topic: T, reason: R) -> Self {
        Self::InvalidTopic {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    pub fn serialization_failed<K: Into<String>, R: Into<String>>(kind: K, reason: R) -> Self {
        Self::SerializationFailed {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    pub fn publish_failed<E>(topic: &str, connection: &str, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        let source = source.into();
        Self::PublishFailed {
            topic: topic.to_string(),
            connection: connection.to_string(),
            reason: sanitize_reason(&source.to_string()),
            source,
        }
    }

    pub fn context(&self) -> ErrorContext {
        match self {
            Self::InvalidTopic { topic, reason } => {
                vec![("topic", topic.clone()), ("reason", reason.clone())]
            }
            Self::SerializationFailed { kind, reason } => {
                vec![("message_type", kind.clone()), ("reason", reason.clone())]
            }
            Self::MissingTopic => Vec::new(),
            Self::PublishFailed {
                topic,
                connection,
                reason,
                ..
            } => vec![
                ("topic", topic.clone()),
                ("connection", connection.clone()),
                ("reason", reason.clone()),
            ],
            Self::PublishTimeout {
                topic,
                connection,
                timeout,
            } => vec![
                ("topic", topic.clone()),
                ("connection", connection.clone()),
                ("timeout", timeout.to_string()),
            ],
            Self::Configuration(e) => e.context(),
        }
    }
}

/// Subscription errors
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Invalid subscription topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("Invalid subscription handler for topic '{topic}'")]
    InvalidHandler { topic: String },

    #[error("Failed to subscribe to topic '{topic}' on connection '{connection}': {reason}")]
    SubscribeFailed {
        topic: String,
        connection: String,
        reason: String,
        #[source]
        source: BoxError,
    },

    #[error("Error in subscription handler for topic '{topic}': {reason}")]
    HandlerError { topic: String, reason: String },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl SubscriptionError {
    pub fn invalid_topic<T: Into<String>, R: Into<String>>(topic: T, reason: R) -> Self {
        Self::InvalidTopic {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    pub fn subscribe_failed<E>(topic: &str, connection: &str, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        let source = source.into();
        Self::SubscribeFailed {
            topic: topic.to_string(),
            connection: connection.to_string(),
            reason: sanitize_reason(&source.to_string()),
            source,
        }
    }

    pub fn context(&self) -> ErrorContext {
        match self {
            Self::InvalidTopic { topic, reason } | Self::HandlerError { topic, reason } => {
                vec![("topic", topic.clone()), ("reason", reason.clone())]
            }
            Self::InvalidHandler { topic } => vec![("topic", topic.clone())],
            Self::SubscribeFailed {
                topic,
                connection,
                reason,
                ..
            } => vec![
                ("topic", topic.clone()),
                ("connection", connection.clone()),
                ("reason", reason.clone()),
            ],
            Self::Configuration(e) => e.context(),
        }
    }
}

/// Umbrella error for callers that mix factory operations
#[derive(Debug, Error)]
pub enum MqttError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

impl MqttError {
    pub fn context(&self) -> ErrorContext {
        match self {
            Self::Configuration(e) => e.context(),
            Self::Connection(e) => e.context(),
            Self::Publish(e) => e.context(),
            Self::Subscription(e) => e.context(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
pub type ConnectionResult<T> = Result<T, ConnectionError>;
pub type PublishResult<T> = Result<T, PublishError>;
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;
pub type MqttResult<T> = Result<T, MqttError>;

const MAX_REASON_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passphrase|token|key|secret)[=:]\s*\S+")
        .expect("secret pattern is a valid regex")
});

/// Redact credentials from an engine-provided reason string and cap its length
pub fn sanitize_reason(reason: &str) -> String {
    let mut sanitized = SECRET_PATTERN.replace_all(reason, "${1}=***").to_string();

    if sanitized.len() > MAX_REASON_LEN {
        let mut cut = MAX_REASON_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_configuration_error_messages() {
        let err = ConfigurationError::connection_not_found("edge");
        assert_eq!(
            err.to_string(),
            "MQTT connection 'edge' not found in configuration"
        );

        let err = ConfigurationError::missing_parameter("edge", "host");
        assert_eq!(
            err.to_string(),
            "Missing required parameter 'host' for MQTT connection 'edge'"
        );

        let err = ConfigurationError::invalid("edge", "bad timeout");
        assert!(err.to_string().contains("bad timeout"));
        assert_eq!(
            err.context(),
            vec![
                ("connection", "edge".to_string()),
                ("reason", "bad timeout".to_string())
            ]
        );
    }

    #[test]
    fn test_failed_to_connect_keeps_source() {
        let cause = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ConnectionError::failed_to_connect("main", "broker.local", 1883, cause);

        assert!(err.to_string().contains("broker.local:1883"));
        assert!(err.to_string().contains("refused"));
        assert!(err.source().is_some());
        assert!(err
            .context()
            .contains(&("port", "1883".to_string())));
    }

    #[test]
    fn test_publish_failed_context() {
        let err = PublishError::publish_failed("a/b", "main", "socket closed");
        assert!(matches!(err, PublishError::PublishFailed { .. }));
        assert!(err.to_string().contains("'a/b'"));
        assert!(err.to_string().contains("'main'"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_configuration_converts_transparently() {
        let err: PublishError = ConfigurationError::connection_not_found("x").into();
        assert_eq!(
            err.to_string(),
            "MQTT connection 'x' not found in configuration"
        );

        let err: MqttError = SubscriptionError::invalid_topic("", "Topic cannot be empty").into();
        assert!(matches!(err, MqttError::Subscription(_)));
    }

    #[test]
    fn test_sanitize_redacts_secrets() {
        let sanitized = sanitize_reason("auth failed: password=hunter2 token: abc");
        assert!(!sanitized.contains("hunter2"));
        assert!(!sanitized.contains("abc"));
        assert!(sanitized.contains("password=***"));
    }

    #[test]
    fn test_sanitize_truncates_long_reasons() {
        let sanitized = sanitize_reason(&"x".repeat(800));
        assert!(sanitized.len() <= MAX_REASON_LEN);
        assert!(sanitized.ends_with(TRUNCATE_SUFFIX));

        let exact = "y".repeat(MAX_REASON_LEN);
        assert_eq!(sanitize_reason(&exact), exact);
    }

    #[test]
    fn test_sanitize_respects_char_boundaries() {
        let sanitized = sanitize_reason(&"é".repeat(400));
        assert!(sanitized.ends_with(TRUNCATE_SUFFIX));
    }
}
