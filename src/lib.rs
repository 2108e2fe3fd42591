//! MQTT connection factory
//!
//! A connection-management layer in front of an MQTT engine: named broker
//! connections built from declarative configuration, validated before any
//! network attempt, cached per name, and instrumented through hooks that can
//! observe every loop tick, publish, inbound message and reconnect without
//! being able to break the message loop.
//!
//! # Overview
//!
//! - [`config`] - TOML configuration model and validation
//! - [`factory`] - [`ConnectionFactory`]: cache, publish, subscribe, interrupt, disconnect
//! - [`hooks`] - hook contracts and the isolating [`HookRegistry`]
//! - [`protocol`] - topic validation, payload codec, [`Envelope`], client ids
//! - [`transport`] - the engine contract and the rumqttc-backed engine
//! - [`signals`] - SIGTERM/SIGINT/SIGQUIT wiring for subscribe loops
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_factory::testing::MockEngineFactory;
//! use mqtt_factory::{ConnectionFactory, Envelope, MqttConfig, QoS};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = MqttConfig::from_toml_str(
//!     r#"
//!     default = "local"
//!
//!     [connections.local]
//!     host = "localhost"
//!     "#,
//! )?;
//!
//! // Any EngineFactory works here; ConnectionFactory::new uses rumqttc
//! let engines = Arc::new(MockEngineFactory::new());
//! let factory = ConnectionFactory::with_engine_factory(config, engines);
//!
//! factory
//!     .publish("sensors/kitchen", "21.5", None, QoS::AtLeastOnce, false)
//!     .await?;
//!
//! let reading = Envelope::from_serializable(&json!({"temperature": 21.5}))?
//!     .to_topic("sensors/kitchen");
//! reading.send(&factory, QoS::AtMostOnce, false).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod factory;
pub mod hooks;
pub mod observability;
pub mod protocol;
pub mod signals;
pub mod testing;
pub mod transport;

pub use config::{ConnectionConfig, MqttConfig, ResolvedConnection};
pub use error::{
    ConfigResult, ConfigurationError, ConnectionError, ConnectionResult, MqttError, MqttResult,
    PublishError, PublishResult, SubscriptionError, SubscriptionResult,
};
pub use factory::{ConnectionFactory, ConnectionStatus};
pub use hooks::{HookKind, HookRegistry};
pub use protocol::{Envelope, Payload};
pub use rumqttc::QoS;
pub use transport::{Engine, EngineFactory, TransportHandle};
