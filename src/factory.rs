//! Connection factory: named, validated, cached broker sessions
//!
//! One [`ConnectionFactory`] owns the handle cache for an application. Each
//! resolved connection name gets its own slot with a build lock, so
//! concurrent callers asking for the same name converge on a single connect
//! while unrelated names never wait on each other.

use crate::config::{MqttConfig, ResolvedConnection, DEFAULT_CONNECTION};
use crate::error::{
    sanitize_reason, ConfigurationError, ConnectionError, ConnectionResult, PublishError,
    PublishResult, SubscriptionError, SubscriptionResult,
};
use crate::hooks::{
    ConnectedEventHandler, ConnectedHook, HookRegistry, HookResult, LoopEventHandler, LoopHook,
    MessageReceivedEventHandler, MessageReceivedHook, PublishEventHandler, PublishHook,
};
use crate::observability::logging::LogChannel;
use crate::protocol::codec::{self, Payload};
use crate::protocol::envelope::Envelope;
use crate::protocol::{client_id, topics};
use crate::signals;
use crate::transport::mqtt::RumqttEngineFactory;
use crate::transport::{
    Engine, EngineError, EngineFactory, EngineParams, MessageCallback, PublishEvent,
    ReceivedEvent, RepositoryRegistry, TransportHandle,
};
use bytes::Bytes;
use rumqttc::QoS;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

/// Caller-supplied subscription handler, invoked with the received topic
pub type MessageHandler = Arc<dyn Fn(&str, &Envelope) -> HookResult + Send + Sync>;

/// Where a named connection sits in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Absent,
    Connecting,
    Connected,
    Disconnecting,
    /// Cached, but the engine no longer reports a live session
    Lost,
}

enum SlotPhase {
    Absent,
    Connecting,
    Connected(TransportHandle),
    Disconnecting,
}

#[derive(Default)]
struct ConnectionSlot {
    build: tokio::sync::Mutex<()>,
    phase: Mutex<Option<SlotPhase>>,
}

impl ConnectionSlot {
    fn set(&self, phase: SlotPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = Some(phase);
    }

    fn cached(&self) -> Option<TransportHandle> {
        match &*self.phase.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(SlotPhase::Connected(handle)) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    fn live(&self) -> Option<TransportHandle> {
        self.cached().filter(|handle| handle.is_connected())
    }

    fn status(&self) -> ConnectionStatus {
        match &*self.phase.lock().unwrap_or_else(PoisonError::into_inner) {
            None | Some(SlotPhase::Absent) => ConnectionStatus::Absent,
            Some(SlotPhase::Connecting) => ConnectionStatus::Connecting,
            Some(SlotPhase::Disconnecting) => ConnectionStatus::Disconnecting,
            Some(SlotPhase::Connected(handle)) if handle.is_connected() => {
                ConnectionStatus::Connected
            }
            Some(SlotPhase::Connected(_)) => ConnectionStatus::Lost,
        }
    }
}

pub struct ConnectionFactory {
    config: MqttConfig,
    hooks: Arc<HookRegistry>,
    engines: Arc<dyn EngineFactory>,
    repositories: RepositoryRegistry,
    slots: Mutex<HashMap<String, Arc<ConnectionSlot>>>,
}

impl ConnectionFactory {
    /// Factory backed by the rumqttc engine
    pub fn new(config: MqttConfig) -> Self {
        Self::with_engine_factory(config, Arc::new(RumqttEngineFactory))
    }

    pub fn with_engine_factory(config: MqttConfig, engines: Arc<dyn EngineFactory>) -> Self {
        Self {
            config,
            hooks: Arc::new(HookRegistry::new()),
            engines,
            repositories: RepositoryRegistry::new(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Build from a configuration provider, evaluated exactly once
    pub fn from_provider<F>(provider: F) -> Self
    where
        F: FnOnce() -> MqttConfig,
    {
        Self::new(provider())
    }

    /// Replace the repository registry used to resolve `repository.class`
    pub fn with_repositories(mut self, repositories: RepositoryRegistry) -> Self {
        self.repositories = repositories;
        self
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Validate one connection without touching the network
    pub fn resolve(&self, name: &str) -> Result<ResolvedConnection, ConfigurationError> {
        self.config.resolve(name, &self.repositories)
    }

    /// Return the cached live handle for `name`, building one if needed
    pub async fn get_or_create(&self, name: &str) -> ConnectionResult<TransportHandle> {
        let name = self.config.resolve_name(name).to_string();
        let slot = self.slot(&name);

        if let Some(handle) = slot.live() {
            return Ok(handle);
        }

        let _build = slot.build.lock().await;
        if let Some(handle) = slot.live() {
            return Ok(handle);
        }
        if let Some(stale) = slot.cached() {
            debug!(connection = %name, "Cached connection is no longer connected, rebuilding");
            // The old session must not keep reconnecting next to its replacement
            slot.set(SlotPhase::Disconnecting);
            if let Err(e) = stale.disconnect().await {
                warn!(connection = %name, error = %e, "Failed to tear down stale connection");
            }
            slot.set(SlotPhase::Absent);
        }

        let resolved = match self.resolve(&name) {
            Ok(resolved) => resolved,
            Err(e) => {
                slot.set(SlotPhase::Absent);
                return Err(e.into());
            }
        };

        slot.set(SlotPhase::Connecting);
        match self.build(&resolved).await {
            Ok(handle) => {
                slot.set(SlotPhase::Connected(Arc::clone(&handle)));
                Ok(handle)
            }
            Err(e) => {
                slot.set(SlotPhase::Absent);
                Err(e)
            }
        }
    }

    async fn build(&self, resolved: &ResolvedConnection) -> ConnectionResult<TransportHandle> {
        let client_id = match &resolved.client_id {
            Some(id) => id.clone(),
            None => client_id::generate(resolved.client_id_prefix.as_deref()),
        };

        let logger = LogChannel::resolve(
            resolved.logging.enabled,
            &resolved.logging.channel,
            &resolved.name,
        );

        let repository = match &resolved.repository {
            Some(class) => Some(self.repositories.create(class).ok_or_else(|| {
                ConfigurationError::invalid(
                    &resolved.name,
                    format!("Repository class '{class}' does not exist"),
                )
            })?),
            None => None,
        };

        let params = EngineParams {
            connection: resolved.name.clone(),
            host: resolved.host.clone(),
            port: resolved.port,
            client_id: client_id.clone(),
            repository,
            logger,
        };

        let engine = self.engines.create(params).map_err(|e| {
            ConnectionError::failed_to_connect(&resolved.name, &resolved.host, resolved.port, e)
        })?;

        info!(
            connection = %resolved.name,
            host = %resolved.host,
            port = resolved.port,
            client_id = %client_id,
            "Connecting to MQTT broker"
        );

        if let Err(e) = engine.connect(&resolved.settings).await {
            warn!(connection = %resolved.name, error = %e, "Failed to connect to MQTT broker");
            return Err(map_connect_error(resolved, e));
        }

        self.wire_hooks(engine.as_ref());
        info!(connection = %resolved.name, client_id = %client_id, "Connected to MQTT broker");
        Ok(engine)
    }

    fn wire_hooks(&self, engine: &dyn Engine) {
        let hooks = Arc::clone(&self.hooks);
        engine.set_loop_callback(Arc::new(move |engine: &dyn Engine, elapsed: Duration| {
            hooks.execute_loop_event_handlers(engine, elapsed)
        }));

        let hooks = Arc::clone(&self.hooks);
        engine.set_publish_callback(Arc::new(move |engine: &dyn Engine, event: &PublishEvent| {
            hooks.execute_publish_event_handlers(engine, event)
        }));

        let hooks = Arc::clone(&self.hooks);
        engine.set_message_received_callback(Arc::new(
            move |engine: &dyn Engine, event: &ReceivedEvent| {
                hooks.execute_message_received_event_handlers(engine, event)
            },
        ));

        let hooks = Arc::clone(&self.hooks);
        engine.set_connected_callback(Arc::new(move |engine: &dyn Engine, reconnect: bool| {
            hooks.execute_connected_event_handlers(engine, reconnect)
        }));
    }

    /// Publish a text or map payload
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Payload>,
        connection: Option<&str>,
        qos: QoS,
        retain: bool,
    ) -> PublishResult<()> {
        topics::validate_publish_topic(topic)?;
        let bytes = codec::serialize(&payload.into())?;
        self.publish_bytes(topic, bytes, connection.unwrap_or(DEFAULT_CONNECTION), qos, retain)
            .await
    }

    /// Publish an envelope; its own connection wins over `connection`
    pub async fn publish_envelope(
        &self,
        envelope: &Envelope,
        connection: Option<&str>,
        qos: QoS,
        retain: bool,
    ) -> PublishResult<()> {
        let topic = envelope.topic().ok_or(PublishError::MissingTopic)?;
        topics::validate_publish_topic(topic)?;
        let connection = envelope
            .connection()
            .or(connection)
            .unwrap_or(DEFAULT_CONNECTION);
        self.publish_bytes(topic, envelope.raw().clone(), connection, qos, retain)
            .await
    }

    async fn publish_bytes(
        &self,
        topic: &str,
        payload: Bytes,
        connection: &str,
        qos: QoS,
        retain: bool,
    ) -> PublishResult<()> {
        let handle = self.get_or_create(connection).await.map_err(|e| match e {
            ConnectionError::Configuration(e) => PublishError::Configuration(e),
            other => PublishError::publish_failed(topic, connection, other),
        })?;

        handle
            .publish(topic, payload, qos, retain)
            .await
            .map_err(|e| match e {
                EngineError::Timeout(timeout) => PublishError::PublishTimeout {
                    topic: topic.to_string(),
                    connection: connection.to_string(),
                    timeout: timeout.as_secs(),
                },
                other => PublishError::publish_failed(topic, connection, other),
            })?;

        debug!(topic = %topic, connection = %connection, "Published message");
        Ok(())
    }

    /// Subscribe and block in the engine loop until interrupted
    pub async fn subscribe<F>(
        &self,
        topic: &str,
        handler: F,
        connection: Option<&str>,
        qos: QoS,
    ) -> SubscriptionResult<()>
    where
        F: Fn(&str, &Envelope) -> HookResult + Send + Sync + 'static,
    {
        self.subscribe_inner(topic, Arc::new(handler), connection, qos, false)
            .await
    }

    /// Like [`Self::subscribe`], but SIGTERM/SIGINT/SIGQUIT interrupt the loop
    pub async fn subscribe_with_signals<F>(
        &self,
        topic: &str,
        handler: F,
        connection: Option<&str>,
        qos: QoS,
    ) -> SubscriptionResult<()>
    where
        F: Fn(&str, &Envelope) -> HookResult + Send + Sync + 'static,
    {
        self.subscribe_inner(topic, Arc::new(handler), connection, qos, true)
            .await
    }

    async fn subscribe_inner(
        &self,
        topic: &str,
        handler: MessageHandler,
        connection: Option<&str>,
        qos: QoS,
        with_signals: bool,
    ) -> SubscriptionResult<()> {
        topics::validate_subscribe_topic(topic)?;
        let connection = self
            .config
            .resolve_name(connection.unwrap_or(DEFAULT_CONNECTION))
            .to_string();

        let handle = self.get_or_create(&connection).await.map_err(|e| match e {
            ConnectionError::Configuration(e) => SubscriptionError::Configuration(e),
            other => SubscriptionError::subscribe_failed(topic, &connection, other),
        })?;

        let callback = wrap_handler(handler, connection.clone());
        handle
            .subscribe(topic, qos, callback)
            .await
            .map_err(|e| SubscriptionError::subscribe_failed(topic, &connection, e))?;
        info!(topic = %topic, connection = %connection, "Subscribed, entering message loop");

        let guard = if with_signals {
            match signals::interrupt_on_signals(Arc::clone(&handle)) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    warn!(error = %e, "Failed to install signal handlers");
                    None
                }
            }
        } else {
            None
        };

        let result = handle
            .run_loop()
            .instrument(crate::loop_span!(topic = %topic, connection = %connection))
            .await;
        if let Some(guard) = guard {
            guard.close().await;
        }

        result.map_err(|e| SubscriptionError::subscribe_failed(topic, &connection, e))?;
        info!(topic = %topic, connection = %connection, "Message loop interrupted");
        Ok(())
    }

    /// Break the blocking loop of `name`, creating the connection if needed
    pub async fn interrupt(&self, name: Option<&str>) -> ConnectionResult<()> {
        let handle = self.get_or_create(name.unwrap_or(DEFAULT_CONNECTION)).await?;
        handle.interrupt();
        debug!(client_id = %handle.client_id(), "Interrupted message loop");
        Ok(())
    }

    /// Disconnect and evict `name`; a no-op when nothing is cached
    pub async fn disconnect(&self, name: Option<&str>) -> ConnectionResult<()> {
        let name = self
            .config
            .resolve_name(name.unwrap_or(DEFAULT_CONNECTION))
            .to_string();
        let Some(slot) = self.existing_slot(&name) else {
            return Ok(());
        };

        let _build = slot.build.lock().await;
        let Some(handle) = slot.cached() else {
            return Ok(());
        };

        slot.set(SlotPhase::Disconnecting);
        let result = handle.disconnect().await;
        slot.set(SlotPhase::Absent);
        self.evict(&name, &slot);

        result.map_err(|e| ConnectionError::DisconnectFailed {
            connection: name.clone(),
            reason: sanitize_reason(&e.to_string()),
            source: Box::new(e),
        })?;
        info!(connection = %name, "Disconnected from MQTT broker");
        Ok(())
    }

    /// Forget the cached handle for `name` without disconnecting it
    pub fn clear_connection_cache(&self, name: &str) {
        let name = self.config.resolve_name(name).to_string();
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&name);
    }

    pub fn clear_all_connections_cache(&self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn has_connection_cache(&self, name: &str) -> bool {
        let name = self.config.resolve_name(name);
        self.existing_slot(name)
            .is_some_and(|slot| slot.cached().is_some())
    }

    pub fn connection_state(&self, name: &str) -> ConnectionStatus {
        let name = self.config.resolve_name(name);
        self.existing_slot(name)
            .map_or(ConnectionStatus::Absent, |slot| slot.status())
    }

    pub fn register_loop_handler<F>(&self, callback: F, id: Option<String>) -> Arc<LoopHook>
    where
        F: Fn(&dyn Engine, Duration) -> HookResult + Send + Sync + 'static,
    {
        let hook = Arc::new(LoopHook::new(callback, id));
        self.hooks
            .register_loop_event_handler(Arc::clone(&hook) as Arc<dyn LoopEventHandler>);
        hook
    }

    pub fn register_publish_handler<F>(&self, callback: F, id: Option<String>) -> Arc<PublishHook>
    where
        F: Fn(&dyn Engine, &PublishEvent) -> HookResult + Send + Sync + 'static,
    {
        let hook = Arc::new(PublishHook::new(callback, id));
        self.hooks
            .register_publish_event_handler(Arc::clone(&hook) as Arc<dyn PublishEventHandler>);
        hook
    }

    pub fn register_message_received_handler<F>(
        &self,
        callback: F,
        id: Option<String>,
    ) -> Arc<MessageReceivedHook>
    where
        F: Fn(&dyn Engine, &ReceivedEvent) -> HookResult + Send + Sync + 'static,
    {
        let hook = Arc::new(MessageReceivedHook::new(callback, id));
        self.hooks.register_message_received_event_handler(
            Arc::clone(&hook) as Arc<dyn MessageReceivedEventHandler>
        );
        hook
    }

    pub fn register_connected_handler<F>(
        &self,
        callback: F,
        id: Option<String>,
    ) -> Arc<ConnectedHook>
    where
        F: Fn(&dyn Engine, bool) -> HookResult + Send + Sync + 'static,
    {
        let hook = Arc::new(ConnectedHook::new(callback, id));
        self.hooks
            .register_connected_event_handler(Arc::clone(&hook) as Arc<dyn ConnectedEventHandler>);
        hook
    }

    /// Remove one loop hook by id, or all of them with `None`
    pub fn unregister_loop_handler(&self, id: Option<&str>) -> usize {
        self.hooks.unregister_loop_event_handler(id)
    }

    pub fn unregister_publish_handler(&self, id: Option<&str>) -> usize {
        self.hooks.unregister_publish_event_handler(id)
    }

    pub fn unregister_message_received_handler(&self, id: Option<&str>) -> usize {
        self.hooks.unregister_message_received_event_handler(id)
    }

    pub fn unregister_connected_handler(&self, id: Option<&str>) -> usize {
        self.hooks.unregister_connected_event_handler(id)
    }

    fn slot(&self, name: &str) -> Arc<ConnectionSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(name.to_string()).or_default())
    }

    fn existing_slot(&self, name: &str) -> Option<Arc<ConnectionSlot>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn evict(&self, name: &str, slot: &Arc<ConnectionSlot>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.get(name).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(name);
        }
    }
}

impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached: Vec<String> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("ConnectionFactory")
            .field("default", &self.config.default)
            .field("cached", &cached)
            .field("hooks", &self.hooks)
            .finish()
    }
}

fn map_connect_error(resolved: &ResolvedConnection, error: EngineError) -> ConnectionError {
    match error {
        EngineError::Timeout(timeout) => ConnectionError::connection_timeout(
            &resolved.name,
            &resolved.host,
            resolved.port,
            timeout.as_secs(),
            error,
        ),
        EngineError::NotAuthorized(_) => ConnectionError::authentication_failed(
            &resolved.name,
            &resolved.host,
            resolved.port,
            resolved.settings.username.as_deref().unwrap_or_default(),
            error,
        ),
        other => ConnectionError::failed_to_connect(
            &resolved.name,
            &resolved.host,
            resolved.port,
            other,
        ),
    }
}

/// Turn raw deliveries into envelopes and contain handler failures
fn wrap_handler(handler: MessageHandler, connection: String) -> MessageCallback {
    Arc::new(move |topic: &str, payload: &[u8]| {
        let envelope = Envelope::from_bytes(Bytes::copy_from_slice(payload))
            .to_topic(topic)
            .use_connection(connection.as_str());

        match catch_unwind(AssertUnwindSafe(|| handler(topic, &envelope))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(
                    topic = %topic,
                    connection = %connection,
                    error = %e,
                    "Subscription handler failed"
                );
            }
            Err(_) => {
                error!(topic = %topic, connection = %connection, "Subscription handler panicked");
            }
        }
    })
}
