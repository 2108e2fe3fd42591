//! Transport layer: the contract with the MQTT engine
//!
//! The factory never talks to a socket directly. It drives an [`Engine`],
//! which owns the wire protocol, keep-alive, QoS retransmission and TLS.
//! [`mqtt::RumqttEngine`] is the production engine; tests plug in the
//! scripted engine from [`crate::testing::mocks`].

use crate::observability::logging::LogChannel;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod mqtt;
pub mod repository;
pub mod settings;

pub use repository::{MemoryRepository, Repository, RepositoryRegistry, Subscription};
pub use settings::{ConnectSettings, LastWillSettings, ReconnectPolicy, TlsSettings};

/// Shared, cached handle to one live engine session
pub type TransportHandle = Arc<dyn Engine>;

/// An outbound publish as seen by publish callbacks
#[derive(Debug, Clone, PartialEq)]
pub struct PublishEvent {
    pub topic: String,
    pub payload: Bytes,
    pub message_id: Option<u16>,
    pub qos: QoS,
    pub retain: bool,
}

/// An inbound message as seen by message-received callbacks
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedEvent {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retained: bool,
}

/// Fired on every iteration of the blocking loop with the time since the loop started
pub type LoopCallback = Arc<dyn Fn(&dyn Engine, Duration) + Send + Sync>;
pub type PublishCallback = Arc<dyn Fn(&dyn Engine, &PublishEvent) + Send + Sync>;
pub type MessageReceivedCallback = Arc<dyn Fn(&dyn Engine, &ReceivedEvent) + Send + Sync>;
/// Fired after a successful connect; the flag is `true` for automatic reconnects
pub type ConnectedCallback = Arc<dyn Fn(&dyn Engine, bool) + Send + Sync>;

/// Per-subscription delivery callback: `(topic, payload)`
pub type MessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Engine-side failures, wrapped into the domain errors by the factory
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Connection refused by broker: {0}")]
    Refused(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Client request failed")]
    Client(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Network error")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("{0}")]
    Other(String),
}

/// What an engine needs to know at construction time
#[derive(Clone)]
pub struct EngineParams {
    pub connection: String,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub repository: Option<Arc<dyn Repository>>,
    pub logger: Option<LogChannel>,
}

impl std::fmt::Debug for EngineParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineParams")
            .field("connection", &self.connection)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("repository", &self.repository.is_some())
            .field("logger", &self.logger)
            .finish()
    }
}

/// The MQTT engine contract
///
/// All methods take `&self` so one handle can be shared between the task
/// blocked in [`Engine::run_loop`] and callers that publish or interrupt.
#[async_trait]
pub trait Engine: Send + Sync {
    fn client_id(&self) -> &str;

    /// Open the session; returns once the broker acknowledged it
    async fn connect(&self, settings: &ConnectSettings) -> Result<(), EngineError>;

    /// Liveness probe used by the factory cache
    fn is_connected(&self) -> bool;

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), EngineError>;

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        callback: MessageCallback,
    ) -> Result<(), EngineError>;

    /// Dispatch inbound traffic and fire callbacks until [`Engine::interrupt`] is called
    async fn run_loop(&self) -> Result<(), EngineError>;

    fn interrupt(&self);

    async fn disconnect(&self) -> Result<(), EngineError>;

    fn set_loop_callback(&self, callback: LoopCallback);
    fn set_publish_callback(&self, callback: PublishCallback);
    fn set_message_received_callback(&self, callback: MessageReceivedCallback);
    fn set_connected_callback(&self, callback: ConnectedCallback);
}

/// Builds engines for the factory; swapped out in tests
pub trait EngineFactory: Send + Sync {
    fn create(&self, params: EngineParams) -> Result<TransportHandle, EngineError>;
}

/// Map a numeric QoS level onto the engine type
pub fn qos_from_u8(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_from_u8() {
        assert_eq!(qos_from_u8(0), Some(QoS::AtMostOnce));
        assert_eq!(qos_from_u8(1), Some(QoS::AtLeastOnce));
        assert_eq!(qos_from_u8(2), Some(QoS::ExactlyOnce));
        assert_eq!(qos_from_u8(3), None);
    }

    #[test]
    fn test_engine_error_messages() {
        assert_eq!(
            EngineError::Timeout(Duration::from_secs(2)).to_string(),
            "Timed out after 2s"
        );
        assert_eq!(EngineError::NotConnected.to_string(), "Not connected");
    }
}
