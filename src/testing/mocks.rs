//! Scripted in-memory engine
//!
//! [`MockEngine`] implements the full [`Engine`] contract without a broker:
//! publishes and subscriptions are recorded, inbound traffic is injected by
//! the test, and the four callback slots fire from `run_loop` the same way
//! the rumqttc engine fires them. [`MockEngineFactory`] hands out mock
//! engines to a `ConnectionFactory` and counts connect attempts across them.

use crate::protocol::topics::topic_matches;
use crate::transport::{
    ConnectSettings, ConnectedCallback, Engine, EngineError, EngineFactory, EngineParams,
    LoopCallback, MessageCallback, MessageReceivedCallback, PublishCallback, PublishEvent,
    ReceivedEvent, TransportHandle,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::QoS;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

/// A message recorded by [`MockEngine::publish`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// How a scripted connect attempt fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    Refused,
    NotAuthorized,
    Timeout,
}

/// Behaviour shared by every engine one factory creates
#[derive(Debug, Default)]
pub struct MockBehavior {
    connect_attempts: AtomicUsize,
    connect_failure: Mutex<Option<ConnectFailure>>,
    fail_publish: AtomicBool,
    connect_delay_ms: AtomicU64,
}

impl MockBehavior {
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.set_connect_failure(fail.then_some(ConnectFailure::Refused));
    }

    pub fn set_connect_failure(&self, failure: Option<ConnectFailure>) {
        *self
            .connect_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = failure;
    }

    fn connect_failure(&self) -> Option<ConnectFailure> {
        *self
            .connect_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[derive(Debug)]
enum MockEvent {
    Message(ReceivedEvent),
    Reconnected,
    Lost(String),
}

#[derive(Default)]
struct Callbacks {
    on_loop: Option<LoopCallback>,
    on_publish: Option<PublishCallback>,
    on_message: Option<MessageReceivedCallback>,
    on_connected: Option<ConnectedCallback>,
}

struct MockSubscription {
    filter: String,
    qos: QoS,
    callback: MessageCallback,
}

pub struct MockEngine {
    params: EngineParams,
    behavior: Arc<MockBehavior>,
    connected: AtomicBool,
    looping: AtomicBool,
    settings: Mutex<Option<ConnectSettings>>,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<MockSubscription>>,
    callbacks: Mutex<Callbacks>,
    next_message_id: AtomicU16,
    interrupts: AtomicUsize,
    disconnects: AtomicUsize,
    interrupt_tx: watch::Sender<bool>,
    events_tx: mpsc::UnboundedSender<MockEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockEvent>>,
}

const TICK: Duration = Duration::from_millis(10);

impl MockEngine {
    /// A standalone engine with default behaviour, already marked connected
    pub fn new(client_id: &str) -> Self {
        let engine = Self::with_behavior(
            EngineParams {
                connection: "mock".to_string(),
                host: "localhost".to_string(),
                port: 1883,
                client_id: client_id.to_string(),
                repository: None,
                logger: None,
            },
            Arc::new(MockBehavior::default()),
        );
        engine.set_connected(true);
        engine
    }

    pub fn with_behavior(params: EngineParams, behavior: Arc<MockBehavior>) -> Self {
        let (interrupt_tx, _) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            params,
            behavior,
            connected: AtomicBool::new(false),
            looping: AtomicBool::new(false),
            settings: Mutex::new(None),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Callbacks::default()),
            next_message_id: AtomicU16::new(1),
            interrupts: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            interrupt_tx,
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
        }
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    pub fn connect_settings(&self) -> Option<ConnectSettings> {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribed_filters(&self) -> Vec<(String, QoS)> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| (s.filter.clone(), s.qos))
            .collect()
    }

    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::SeqCst)
    }

    /// Flip the liveness probe without touching anything else
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Queue an inbound message for the running (or next) loop
    pub fn inject_message(&self, topic: &str, payload: impl Into<Bytes>) {
        let _ = self.events_tx.send(MockEvent::Message(ReceivedEvent {
            topic: topic.to_string(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retained: false,
        }));
    }

    /// Queue an automatic-reconnect notification
    pub fn simulate_reconnect(&self) {
        let _ = self.events_tx.send(MockEvent::Reconnected);
    }

    /// Queue a fatal connection loss; the loop returns an error when it sees it
    pub fn simulate_connection_lost(&self, reason: &str) {
        let _ = self.events_tx.send(MockEvent::Lost(reason.to_string()));
    }

    /// Fire the loop callback once, outside of `run_loop`
    pub fn fire_loop_callback(&self, elapsed: Duration) {
        if let Some(callback) = self.callbacks().on_loop {
            callback(self, elapsed);
        }
    }

    fn callbacks(&self) -> Callbacks {
        let callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        Callbacks {
            on_loop: callbacks.on_loop.clone(),
            on_publish: callbacks.on_publish.clone(),
            on_message: callbacks.on_message.clone(),
            on_connected: callbacks.on_connected.clone(),
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

    fn consume_interrupt(&self) {
        self.interrupt_tx.send_replace(false);
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn client_id(&self) -> &str {
        &self.params.client_id
    }

    async fn connect(&self, settings: &ConnectSettings) -> Result<(), EngineError> {
        self.behavior.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.behavior.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        match self.behavior.connect_failure() {
            Some(ConnectFailure::Refused) => {
                return Err(EngineError::Refused(format!(
                    "scripted failure for {}:{}",
                    self.params.host, self.params.port
                )));
            }
            Some(ConnectFailure::NotAuthorized) => {
                return Err(EngineError::NotAuthorized("BadUserNamePassword".to_string()));
            }
            Some(ConnectFailure::Timeout) => {
                return Err(EngineError::Timeout(settings.connect_timeout));
            }
            None => {}
        }

        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = Some(settings.clone());
        self.set_connected(true);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), EngineError> {
        if !self.is_connected() {
            return Err(EngineError::NotConnected);
        }
        if self.behavior.fail_publish.load(Ordering::SeqCst) {
            return Err(EngineError::Other("scripted publish failure".to_string()));
        }

        let message_id = match qos {
            QoS::AtMostOnce => None,
            _ => Some(self.next_message_id.fetch_add(1, Ordering::SeqCst)),
        };

        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PublishedMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
                qos,
                retain,
            });

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
        if !self.is_connected() {
            return Err(EngineError::NotConnected);
        }
        if let Some(repository) = &self.params.repository {
            repository.add_subscription(filter, qos);
        }
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MockSubscription {
                filter: filter.to_string(),
                qos,
                callback,
            });
        Ok(())
    }

    async fn run_loop(&self) -> Result<(), EngineError> {
        let mut events = self.events_rx.lock().await;
        let mut interrupt_rx = self.interrupt_tx.subscribe();
        if *interrupt_rx.borrow_and_update() {
            self.consume_interrupt();
            return Ok(());
        }

        self.looping.store(true, Ordering::SeqCst);
        let started = Instant::now();
        let mut tick = tokio::time::interval(TICK);

        let result = loop {
            tokio::select! {
                _ = interrupt_rx.changed() => {
                    if *interrupt_rx.borrow_and_update() {
                        break Ok(());
                    }
                }
                Some(event) = events.recv() => match event {
                    MockEvent::Message(received) => self.deliver(&received),
                    MockEvent::Reconnected => {
                        self.set_connected(true);
                        if let Some(callback) = self.callbacks().on_connected {
                            callback(self, true);
                        }
                    }
                    MockEvent::Lost(reason) => {
                        self.set_connected(false);
                        break Err(EngineError::ConnectionLost(reason));
                    }
                },
                _ = tick.tick() => {
                    if let Some(callback) = self.callbacks().on_loop {
                        callback(self, started.elapsed());
                    }
                }
            }
        };

        self.looping.store(false, Ordering::SeqCst);
        self.consume_interrupt();
        result
    }

    fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        self.interrupt_tx.send_replace(true);
    }

    async fn disconnect(&self) -> Result<(), EngineError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.set_connected(false);
        Ok(())
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

/// Engine factory handing out [`MockEngine`]s
#[derive(Default)]
pub struct MockEngineFactory {
    behavior: Arc<MockBehavior>,
    engines: Mutex<Vec<Arc<MockEngine>>>,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn behavior(&self) -> &MockBehavior {
        &self.behavior
    }

    /// Total `connect` calls across every engine this factory created
    pub fn connect_attempts(&self) -> usize {
        self.behavior.connect_attempts()
    }

    pub fn engines(&self) -> Vec<Arc<MockEngine>> {
        self.engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_engine(&self) -> Option<Arc<MockEngine>> {
        self.engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl EngineFactory for MockEngineFactory {
    fn create(&self, params: EngineParams) -> Result<TransportHandle, EngineError> {
        let engine = Arc::new(MockEngine::with_behavior(
            params,
            Arc::clone(&self.behavior),
        ));
        self.engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&engine));
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_records_settings() {
        let factory = MockEngineFactory::new();
        let engine = factory
            .create(MockEngine::new("c").params().clone())
            .unwrap();

        assert!(!engine.is_connected());
        engine.connect(&ConnectSettings::default()).await.unwrap();
        assert!(engine.is_connected());
        assert_eq!(factory.connect_attempts(), 1);
        assert!(factory.last_engine().unwrap().connect_settings().is_some());
    }

    #[tokio::test]
    async fn test_scripted_connect_failure() {
        let factory = MockEngineFactory::new();
        factory.behavior().set_fail_connect(true);
        let engine = factory
            .create(MockEngine::new("c").params().clone())
            .unwrap();

        assert!(engine.connect(&ConnectSettings::default()).await.is_err());
        assert!(!engine.is_connected());
    }

    #[tokio::test]
    async fn test_interrupt_before_loop_is_latched() {
        let engine = MockEngine::new("c");
        engine.interrupt();
        engine.run_loop().await.unwrap();
        assert_eq!(engine.interrupt_count(), 1);
        assert!(!engine.is_looping());
    }

    #[tokio::test]
    async fn test_loop_delivers_to_matching_subscriptions() {
        let engine = Arc::new(MockEngine::new("c"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine
            .subscribe(
                "sensors/+",
                QoS::AtMostOnce,
                Arc::new(move |topic: &str, payload: &[u8]| {
                    sink.lock()
                        .unwrap()
                        .push((topic.to_string(), payload.to_vec()));
                }),
            )
            .await
            .unwrap();

        engine.inject_message("sensors/a", "1");
        engine.inject_message("other/a", "2");
        engine.simulate_connection_lost("gone");

        let result = engine.run_loop().await;
        assert!(matches!(result, Err(EngineError::ConnectionLost(_))));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("sensors/a".to_string(), b"1".to_vec())]
        );
        assert!(!engine.is_connected());
    }
}
