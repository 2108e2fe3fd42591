//! Impure I/O: the rumqttc-backed engine
//!
//! `connect` polls the rumqttc event loop until the broker's ConnAck arrives,
//! then hands the event loop to a background driver task. The driver applies
//! the reconnect policy and forwards inbound traffic over a channel, so every
//! hook and subscription callback fires on the task blocked in `run_loop`.

use super::connection::{configure_mqtt_options, ConnectionState};
use super::message_handler::{route_mqtt_event, EventRoute};
use crate::error::sanitize_reason;
use crate::protocol::topics::topic_matches;
use crate::transport::repository::PendingMessage;
use crate::transport::{
    ConnectSettings, ConnectedCallback, Engine, EngineError, EngineFactory, EngineParams,
    LoopCallback, MemoryRepository, MessageCallback, MessageReceivedCallback, PublishCallback,
    PublishEvent, ReceivedEvent, ReconnectPolicy, Repository, TransportHandle,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Packet, QoS};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const LOOP_TICK: Duration = Duration::from_millis(100);
const DRIVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// What the driver task forwards to the loop
#[derive(Debug)]
enum DriverEvent {
    Message(ReceivedEvent),
    Reconnected,
    Lost(String),
}

#[derive(Default, Clone)]
struct Callbacks {
    on_loop: Option<LoopCallback>,
    on_publish: Option<PublishCallback>,
    on_message: Option<MessageReceivedCallback>,
    on_connected: Option<ConnectedCallback>,
}

/// A QoS 1/2 publish waiting for rumqttc to assign its packet id
struct OutgoingRequest {
    topic: String,
    qos: QoS,
    assigned: oneshot::Sender<u16>,
}

type OutgoingQueue = Arc<Mutex<VecDeque<OutgoingRequest>>>;

#[derive(Clone)]
struct SubscriptionEntry {
    filter: String,
    callback: MessageCallback,
}

/// Per-session state created by a successful connect
struct Session {
    client: AsyncClient,
    shutdown_tx: watch::Sender<bool>,
    driver: JoinHandle<()>,
    request_timeout: Duration,
}

/// MQTT engine backed by `rumqttc`
pub struct RumqttEngine {
    params: EngineParams,
    repository: Arc<dyn Repository>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    session: Mutex<Option<Session>>,
    events_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<DriverEvent>>>,
    outgoing: OutgoingQueue,
    subscriptions: Mutex<Vec<SubscriptionEntry>>,
    callbacks: Mutex<Callbacks>,
    interrupt_tx: watch::Sender<bool>,
}

impl RumqttEngine {
    pub fn new(params: EngineParams) -> Self {
        let repository = params
            .repository
            .clone()
            .unwrap_or_else(|| Arc::new(MemoryRepository::new()));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (interrupt_tx, _) = watch::channel(false);

        Self {
            params,
            repository,
            state_tx: Arc::new(state_tx),
            session: Mutex::new(None),
            events_rx: tokio::sync::Mutex::new(None),
            outgoing: Arc::new(Mutex::new(VecDeque::new())),
            subscriptions: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Callbacks::default()),
            interrupt_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    fn callbacks(&self) -> Callbacks {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn client(&self) -> Result<(AsyncClient, Duration), EngineError> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| (s.client.clone(), s.request_timeout))
            .ok_or(EngineError::NotConnected)
    }

    /// Poll until the broker acknowledges the connection
    async fn wait_for_connack(
        event_loop: &mut EventLoop,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        let confirmation = tokio::time::timeout(timeout, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(event) => debug!(?event, "Event before ConnAck"),
                    Err(e) => return Err(map_connection_error(e)),
                }
            }
        })
        .await;

        match confirmation {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(timeout)),
        }
    }

    fn deliver(&self, event: &ReceivedEvent) {
        let matching: Vec<MessageCallback> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| topic_matches(&s.filter, &event.topic))
            .map(|s| Arc::clone(&s.callback))
            .collect();

        for callback in matching {
            callback(&event.topic, &event.payload);
        }

        if let Some(callback) = self.callbacks().on_message {
            callback(self, event);
        }
    }

    fn shutdown_session(&self) -> Option<Session> {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = &session {
            session.shutdown_tx.send_replace(true);
        }
        session
    }
}

#[async_trait]
impl Engine for RumqttEngine {
    fn client_id(&self) -> &str {
        &self.params.client_id
    }

    async fn connect(&self, settings: &ConnectSettings) -> Result<(), EngineError> {
        let options = configure_mqtt_options(&self.params, settings)?;
        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        self.state_tx.send_replace(ConnectionState::Connecting);
        info!(
            connection = %self.params.connection,
            host = %self.params.host,
            port = self.params.port,
            client_id = %self.params.client_id,
            "Connecting to MQTT broker"
        );

        if let Err(e) = Self::wait_for_connack(&mut event_loop, settings.connect_timeout).await {
            self.state_tx
                .send_replace(ConnectionState::Lost(sanitize_reason(&e.to_string())));
            return Err(e);
        }

        if let Some(previous) = self.shutdown_session() {
            previous.driver.abort();
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = Driver {
            connection: self.params.connection.clone(),
            client: client.clone(),
            event_loop,
            events_tx,
            shutdown_rx,
            state_tx: Arc::clone(&self.state_tx),
            repository: Arc::clone(&self.repository),
            outgoing: Arc::clone(&self.outgoing),
            policy: settings.reconnect.clone(),
        };

        let span = match &self.params.logger {
            Some(channel) => channel.span().clone(),
            None => tracing::Span::none(),
        };
        let handle = tokio::spawn(driver.run().instrument(span));

        *self.events_rx.lock().await = Some(events_rx);
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(Session {
            client,
            shutdown_tx,
            driver: handle,
            request_timeout: settings.socket_timeout,
        });
        self.state_tx.send_replace(ConnectionState::Connected);

        info!(connection = %self.params.connection, "Connected to MQTT broker");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        matches!(*self.state_tx.borrow(), ConnectionState::Connected)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), EngineError> {
        let (client, timeout) = self.client()?;

        let assigned = if qos == QoS::AtMostOnce {
            None
        } else {
            let (assigned_tx, assigned_rx) = oneshot::channel();
            self.outgoing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(OutgoingRequest {
                    topic: topic.to_string(),
                    qos,
                    assigned: assigned_tx,
                });
            Some(assigned_rx)
        };

        let queued = tokio::time::timeout(
            timeout,
            client.publish(topic, qos, retain, payload.to_vec()),
        )
        .await
        .map_err(|_| EngineError::Timeout(timeout))
        .and_then(|sent| sent.map_err(|e| EngineError::Client(Box::new(e))));

        if let Err(e) = queued {
            if qos != QoS::AtMostOnce {
                self.outgoing
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_back();
            }
            return Err(e);
        }

        // Stays None if the driver does not send the packet within the request timeout
        let message_id = match assigned {
            Some(assigned_rx) => tokio::time::timeout(timeout, assigned_rx)
                .await
                .ok()
                .and_then(Result::ok),
            None => None,
        };

        debug!(topic = %topic, ?qos, retain, ?message_id, "Publish queued");

        if let Some(callback) = self.callbacks().on_publish {
            callback(
                self,
                &PublishEvent {
                    topic: topic.to_string(),
                    payload,
                    message_id,
                    qos,
                    retain,
                },
            );
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        callback: MessageCallback,
    ) -> Result<(), EngineError> {
        let (client, timeout) = self.client()?;

        tokio::time::timeout(timeout, client.subscribe(filter, qos))
            .await
            .map_err(|_| EngineError::Timeout(timeout))?
            .map_err(|e| EngineError::Client(Box::new(e)))?;

        self.repository.add_subscription(filter, qos);

        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscriptions.retain(|s| s.filter != filter);
        subscriptions.push(SubscriptionEntry {
            filter: filter.to_string(),
            callback,
        });

        debug!(filter = %filter, ?qos, "Subscribed");
        Ok(())
    }

    async fn run_loop(&self) -> Result<(), EngineError> {
        let mut events_guard = self.events_rx.lock().await;
        let events = events_guard.as_mut().ok_or(EngineError::NotConnected)?;

        let mut interrupt_rx = self.interrupt_tx.subscribe();
        if *interrupt_rx.borrow_and_update() {
            self.interrupt_tx.send_replace(false);
            return Ok(());
        }

        let started = Instant::now();
        let mut tick = tokio::time::interval(LOOP_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let result = loop {
            tokio::select! {
                _ = interrupt_rx.changed() => {
                    if *interrupt_rx.borrow_and_update() {
                        debug!(connection = %self.params.connection, "Loop interrupted");
                        break Ok(());
                    }
                }
                event = events.recv() => match event {
                    Some(DriverEvent::Message(received)) => self.deliver(&received),
                    Some(DriverEvent::Reconnected) => {
                        if let Some(callback) = self.callbacks().on_connected {
                            callback(self, true);
                        }
                    }
                    Some(DriverEvent::Lost(reason)) => {
                        break Err(EngineError::ConnectionLost(reason));
                    }
                    None => {
                        break Err(EngineError::ConnectionLost("event loop stopped".to_string()));
                    }
                },
                _ = tick.tick() => {
                    if let Some(callback) = self.callbacks().on_loop {
                        callback(self, started.elapsed());
                    }
                }
            }
        };

        self.interrupt_tx.send_replace(false);
        result
    }

    fn interrupt(&self) {
        self.interrupt_tx.send_replace(true);
    }

    async fn disconnect(&self) -> Result<(), EngineError> {
        let Some(session) = self.shutdown_session() else {
            return Ok(());
        };

        let result = session
            .client
            .disconnect()
            .await
            .map_err(|e| EngineError::Client(Box::new(e)));

        let mut driver = session.driver;
        if tokio::time::timeout(DRIVER_SHUTDOWN_GRACE, &mut driver)
            .await
            .is_err()
        {
            driver.abort();
        }

        self.state_tx.send_replace(ConnectionState::Disconnected);
        info!(connection = %self.params.connection, "Disconnected from MQTT broker");
        result
    }

    fn set_loop_callback(&self, callback: LoopCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_loop = Some(callback);
    }

    fn set_publish_callback(&self, callback: PublishCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_publish = Some(callback);
    }

    fn set_message_received_callback(&self, callback: MessageReceivedCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_message = Some(callback);
    }

    fn set_connected_callback(&self, callback: ConnectedCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_connected = Some(callback);
    }
}

impl Drop for RumqttEngine {
    fn drop(&mut self) {
        if let Some(session) = self.shutdown_session() {
            session.driver.abort();
        }
    }
}

/// Background task owning the rumqttc event loop
struct Driver {
    connection: String,
    client: AsyncClient,
    event_loop: EventLoop,
    events_tx: mpsc::UnboundedSender<DriverEvent>,
    shutdown_rx: watch::Receiver<bool>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    repository: Arc<dyn Repository>,
    outgoing: OutgoingQueue,
    policy: ReconnectPolicy,
}

impl Driver {
    async fn run(mut self) {
        let mut attempts = 0u32;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        debug!(connection = %self.connection, "Driver shutting down");
                        break;
                    }
                }
                polled = self.event_loop.poll() => match polled {
                    Ok(event) => {
                        if self.handle_route(route_mqtt_event(&event)) {
                            attempts = 0;
                        }
                    }
                    Err(e) => {
                        self.state_tx.send_replace(ConnectionState::Reconnecting(attempts + 1));
                        let reason = sanitize_reason(&e.to_string());
                        attempts += 1;

                        if !self.policy.allows(attempts) {
                            error!(
                                connection = %self.connection,
                                attempts,
                                error = %reason,
                                "MQTT connection lost"
                            );
                            self.state_tx.send_replace(ConnectionState::Lost(reason.clone()));
                            let _ = self.events_tx.send(DriverEvent::Lost(reason));
                            break;
                        }

                        warn!(
                            connection = %self.connection,
                            attempt = attempts,
                            max_attempts = self.policy.max_attempts,
                            error = %reason,
                            "MQTT connection error, reconnecting"
                        );
                        if !self.interruptible_sleep(self.policy.delay).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Returns `true` when the event confirmed a (re)connect
    fn handle_route(&mut self, route: EventRoute) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged { session_present } => {
                self.state_tx.send_replace(ConnectionState::Connected);
                info!(connection = %self.connection, session_present, "Reconnected to MQTT broker");
                if !session_present {
                    self.resubscribe();
                }
                let _ = self.events_tx.send(DriverEvent::Reconnected);
                true
            }
            EventRoute::MessageReceived(received) => {
                debug!(topic = %received.topic, "Message received");
                let _ = self.events_tx.send(DriverEvent::Message(received));
                false
            }
            EventRoute::OutgoingPublish(message_id) => {
                let next = self
                    .outgoing
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                if let Some(request) = next {
                    self.repository.add_pending_outgoing(PendingMessage {
                        message_id,
                        topic: request.topic,
                        qos: request.qos,
                    });
                    let _ = request.assigned.send(message_id);
                }
                false
            }
            EventRoute::PublishCompleted(message_id) => {
                self.repository.acknowledge_outgoing(message_id);
                false
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                rejected,
            } => {
                if rejected {
                    warn!(connection = %self.connection, packet_id, "Broker rejected subscription");
                }
                false
            }
            EventRoute::Disconnected => {
                warn!(connection = %self.connection, "Broker sent DISCONNECT");
                self.state_tx.send_replace(ConnectionState::Disconnected);
                false
            }
            EventRoute::Other => false,
        }
    }

    /// Queues without awaiting: the request channel only drains while this task polls
    fn resubscribe(&self) {
        for subscription in self.repository.subscriptions() {
            match self
                .client
                .try_subscribe(subscription.filter.clone(), subscription.qos)
            {
                Ok(()) => debug!(filter = %subscription.filter, "Re-subscribed"),
                Err(e) => {
                    error!(filter = %subscription.filter, error = %e, "Failed to re-subscribe")
                }
            }
        }
    }

    /// Returns `false` if shutdown was requested while sleeping
    async fn interruptible_sleep(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown_rx.changed() => !*self.shutdown_rx.borrow(),
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

fn map_connection_error(error: ConnectionError) -> EngineError {
    match error {
        ConnectionError::ConnectionRefused(
            code @ (ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized),
        ) => EngineError::NotAuthorized(format!("{code:?}")),
        ConnectionError::ConnectionRefused(code) => EngineError::Refused(format!("{code:?}")),
        other => EngineError::Network(Box::new(other)),
    }
}

/// Production engine factory
#[derive(Debug, Default, Clone, Copy)]
pub struct RumqttEngineFactory;

impl EngineFactory for RumqttEngineFactory {
    fn create(&self, params: EngineParams) -> Result<TransportHandle, EngineError> {
        Ok(Arc::new(RumqttEngine::new(params)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(port: u16) -> EngineParams {
        EngineParams {
            connection: "default".to_string(),
            host: "127.0.0.1".to_string(),
            port,
            client_id: "mqtt_engine_test".to_string(),
            repository: None,
            logger: None,
        }
    }

    #[test]
    fn test_new_engine_is_disconnected() {
        let engine = RumqttEngine::new(params(1883));
        assert!(!engine.is_connected());
        assert_eq!(engine.state(), ConnectionState::Disconnected);
        assert_eq!(engine.client_id(), "mqtt_engine_test");
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let engine = RumqttEngine::new(params(1883));
        let publish = engine
            .publish("a/b", Bytes::from_static(b"x"), QoS::AtMostOnce, false)
            .await;
        assert!(matches!(publish, Err(EngineError::NotConnected)));

        let subscribe = engine
            .subscribe("a/#", QoS::AtMostOnce, Arc::new(|_: &str, _: &[u8]| {}))
            .await;
        assert!(matches!(subscribe, Err(EngineError::NotConnected)));

        assert!(matches!(engine.run_loop().await, Err(EngineError::NotConnected)));
        assert!(engine.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let engine = RumqttEngine::new(params(port));
        let settings = ConnectSettings {
            connect_timeout: Duration::from_secs(2),
            ..ConnectSettings::default()
        };

        let result = engine.connect(&settings).await;
        assert!(result.is_err());
        assert!(!engine.is_connected());
    }

    /// Acknowledges one CONNECT and then swallows whatever the client sends
    async fn accept_one_client(listener: tokio::net::TcpListener) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await.unwrap();
        socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
        while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
    }

    #[tokio::test]
    async fn test_publish_hook_sees_packet_id() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(accept_one_client(listener));

        let engine = RumqttEngine::new(params(port));
        let settings = ConnectSettings {
            connect_timeout: Duration::from_secs(5),
            ..ConnectSettings::default()
        };
        engine.connect(&settings).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.set_publish_callback(Arc::new(move |_: &dyn Engine, event: &PublishEvent| {
            sink.lock().unwrap().push((event.qos, event.message_id));
        }));

        engine
            .publish("a/b", Bytes::from_static(b"x"), QoS::AtLeastOnce, false)
            .await
            .unwrap();
        engine
            .publish("a/b", Bytes::from_static(b"y"), QoS::AtMostOnce, false)
            .await
            .unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, QoS::AtLeastOnce);
        assert!(seen[0].1.is_some());
        assert_eq!(seen[1], (QoS::AtMostOnce, None));
        assert_eq!(engine.repository().pending_outgoing().len(), 1);

        let _ = engine.disconnect().await;
        broker.abort();
    }

    #[test]
    fn test_refused_codes_are_mapped() {
        let err = map_connection_error(ConnectionError::ConnectionRefused(
            ConnectReturnCode::NotAuthorized,
        ));
        assert!(matches!(err, EngineError::NotAuthorized(_)));

        let err = map_connection_error(ConnectionError::ConnectionRefused(
            ConnectReturnCode::ServiceUnavailable,
        ));
        assert!(matches!(err, EngineError::Refused(_)));
    }
}
