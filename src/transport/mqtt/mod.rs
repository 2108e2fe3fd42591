//! rumqttc-backed MQTT engine
//!
//! The module separates pure functions from I/O:
//!
//! - [`connection`] - settings to `MqttOptions` translation and TLS material loading
//! - [`message_handler`] - routing of polled rumqttc events
//! - [`client`] - the [`RumqttEngine`] itself and its background driver task
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_factory::transport::mqtt::RumqttEngine;
//! use mqtt_factory::transport::{ConnectSettings, Engine, EngineParams};
//!
//! # tokio_test::block_on(async {
//! let engine = RumqttEngine::new(EngineParams {
//!     connection: "default".to_string(),
//!     host: "localhost".to_string(),
//!     port: 1883,
//!     client_id: "mqtt_example".to_string(),
//!     repository: None,
//!     logger: None,
//! });
//! engine.connect(&ConnectSettings::default()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{RumqttEngine, RumqttEngineFactory};
pub use connection::{build_tls_transport, configure_mqtt_options, ConnectionState};
pub use message_handler::{route_mqtt_event, EventRoute};
