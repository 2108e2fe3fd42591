//! Session state repositories
//!
//! A repository tracks the subscriptions and in-flight outgoing messages of
//! one engine session so an automatic reconnect can restore them. Which
//! implementation a connection uses is chosen by name in configuration and
//! looked up in a [`RepositoryRegistry`] while the configuration is validated.

use crate::protocol::topics::topic_matches;
use rumqttc::QoS;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

pub const MEMORY_REPOSITORY: &str = "memory";

#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub filter: String,
    pub qos: QoS,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub message_id: u16,
    pub topic: String,
    pub qos: QoS,
}

/// Bookkeeping capability set an engine relies on
pub trait Repository: Send + Sync {
    /// Insert or update the subscription for `filter`
    fn add_subscription(&self, filter: &str, qos: QoS);
    fn remove_subscription(&self, filter: &str) -> bool;
    fn subscriptions(&self) -> Vec<Subscription>;
    fn subscriptions_matching(&self, topic: &str) -> Vec<Subscription> {
        self.subscriptions()
            .into_iter()
            .filter(|s| topic_matches(&s.filter, topic))
            .collect()
    }

    fn add_pending_outgoing(&self, message: PendingMessage);
    /// Drop an acknowledged message; returns whether it was pending
    fn acknowledge_outgoing(&self, message_id: u16) -> bool;
    fn pending_outgoing(&self) -> Vec<PendingMessage>;

    fn reset(&self);
}

#[derive(Debug, Default)]
struct MemoryState {
    subscriptions: Vec<Subscription>,
    pending: HashMap<u16, PendingMessage>,
}

/// Default in-process repository
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repository for MemoryRepository {
    fn add_subscription(&self, filter: &str, qos: QoS) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.subscriptions.iter_mut().find(|s| s.filter == filter) {
            Some(existing) => existing.qos = qos,
            None => state.subscriptions.push(Subscription {
                filter: filter.to_string(),
                qos,
            }),
        }
    }

    fn remove_subscription(&self, filter: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.filter != filter);
        state.subscriptions.len() != before
    }

    fn subscriptions(&self) -> Vec<Subscription> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscriptions
            .clone()
    }

    fn add_pending_outgoing(&self, message: PendingMessage) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .insert(message.message_id, message);
    }

    fn acknowledge_outgoing(&self, message_id: u16) -> bool {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .remove(&message_id)
            .is_some()
    }

    fn pending_outgoing(&self) -> Vec<PendingMessage> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut pending: Vec<_> = state.pending.values().cloned().collect();
        pending.sort_by_key(|p| p.message_id);
        pending
    }

    fn reset(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.subscriptions.clear();
        state.pending.clear();
    }
}

pub type RepositoryConstructor = Arc<dyn Fn() -> Arc<dyn Repository> + Send + Sync>;

/// Name to constructor mapping for configurable repositories
#[derive(Clone)]
pub struct RepositoryRegistry {
    constructors: HashMap<String, RepositoryConstructor>,
}

impl RepositoryRegistry {
    /// A registry that only knows the in-memory repository
    pub fn new() -> Self {
        let mut registry = Self {
            constructors: HashMap::new(),
        };
        registry.register(MEMORY_REPOSITORY, || {
            Arc::new(MemoryRepository::new()) as Arc<dyn Repository>
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn() -> Arc<dyn Repository> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_string(), Arc::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate a fresh repository, `None` when the name is unknown
    pub fn create(&self, name: &str) -> Option<Arc<dyn Repository>> {
        self.constructors.get(name).map(|constructor| constructor())
    }
}

impl Default for RepositoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RepositoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriptions_are_upserted() {
        let repo = MemoryRepository::new();
        repo.add_subscription("a/#", QoS::AtMostOnce);
        repo.add_subscription("a/#", QoS::AtLeastOnce);
        repo.add_subscription("b/+", QoS::AtMostOnce);

        let subs = repo.subscriptions();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].qos, QoS::AtLeastOnce);

        assert_eq!(repo.subscriptions_matching("a/x/y").len(), 1);
        assert!(repo.remove_subscription("a/#"));
        assert!(!repo.remove_subscription("a/#"));
    }

    #[test]
    fn test_pending_outgoing() {
        let repo = MemoryRepository::new();
        for id in [3, 1, 2] {
            repo.add_pending_outgoing(PendingMessage {
                message_id: id,
                topic: "t".to_string(),
                qos: QoS::AtLeastOnce,
            });
        }

        let ids: Vec<u16> = repo.pending_outgoing().iter().map(|p| p.message_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(repo.acknowledge_outgoing(2));
        assert!(!repo.acknowledge_outgoing(2));

        repo.reset();
        assert!(repo.pending_outgoing().is_empty());
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = RepositoryRegistry::new();
        assert!(registry.contains(MEMORY_REPOSITORY));
        assert!(registry.create("redis").is_none());

        registry.register("redis", || Arc::new(MemoryRepository::new()) as Arc<dyn Repository>);
        assert_eq!(registry.names(), vec!["memory".to_string(), "redis".to_string()]);

        let a = registry.create("redis").unwrap();
        let b = registry.create("redis").unwrap();
        a.add_subscription("x", QoS::AtMostOnce);
        assert!(b.subscriptions().is_empty());
    }
}
