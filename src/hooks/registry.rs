//! Hook registry with isolated execution
//!
//! Each hook kind lives in its own ordered slot keyed by hook id.
//! Registering an id that is already present replaces that entry in place.
//! Execution iterates a snapshot of the slot, so hooks may be registered or
//! removed from inside a running hook without disturbing the current pass.
//! A hook that returns an error or panics is logged and skipped; the rest of
//! the pass still runs.

use super::{
    ConnectedEventHandler, Hook, HookResult, LoopEventHandler, MessageReceivedEventHandler,
    PublishEventHandler,
};
use crate::transport::{Engine, PublishEvent, ReceivedEvent};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Loop,
    Publish,
    MessageReceived,
    Connected,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookKind::Loop => "loop",
            HookKind::Publish => "publish",
            HookKind::MessageReceived => "message_received",
            HookKind::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Registered hook ids per kind, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookInventory {
    pub loop_hooks: Vec<String>,
    pub publish_hooks: Vec<String>,
    pub message_received_hooks: Vec<String>,
    pub connected_hooks: Vec<String>,
}

impl HookInventory {
    pub fn total(&self) -> usize {
        self.loop_hooks.len()
            + self.publish_hooks.len()
            + self.message_received_hooks.len()
            + self.connected_hooks.len()
    }
}

struct HookSlot<T: ?Sized> {
    kind: HookKind,
    hooks: RwLock<Vec<Arc<T>>>,
}

impl<T: Hook + ?Sized> HookSlot<T> {
    fn new(kind: HookKind) -> Self {
        Self {
            kind,
            hooks: RwLock::new(Vec::new()),
        }
    }

    fn register(&self, hook: Arc<T>) {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        match hooks.iter().position(|h| h.id() == hook.id()) {
            Some(index) => hooks[index] = hook,
            None => hooks.push(hook),
        }
    }

    fn unregister(&self, id: Option<&str>) -> usize {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        let before = hooks.len();
        match id {
            Some(id) => hooks.retain(|h| h.id() != id),
            None => hooks.clear(),
        }
        before - hooks.len()
    }

    fn snapshot(&self) -> Vec<Arc<T>> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ids(&self) -> Vec<String> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|h| h.id().to_string())
            .collect()
    }

    fn len(&self) -> usize {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn execute(&self, call: impl Fn(&T) -> HookResult) {
        for hook in self.snapshot() {
            if !hook.is_enabled() {
                continue;
            }

            match panic::catch_unwind(AssertUnwindSafe(|| call(hook.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        hook_id = %hook.id(),
                        hook_kind = %self.kind,
                        error = %e,
                        "Hook execution failed"
                    );
                }
                Err(payload) => {
                    error!(
                        hook_id = %hook.id(),
                        hook_kind = %self.kind,
                        panic = %panic_message(payload.as_ref()),
                        "Hook panicked"
                    );
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Ordered collections of the four hook kinds
pub struct HookRegistry {
    loop_hooks: HookSlot<dyn LoopEventHandler>,
    publish_hooks: HookSlot<dyn PublishEventHandler>,
    message_received_hooks: HookSlot<dyn MessageReceivedEventHandler>,
    connected_hooks: HookSlot<dyn ConnectedEventHandler>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            loop_hooks: HookSlot::new(HookKind::Loop),
            publish_hooks: HookSlot::new(HookKind::Publish),
            message_received_hooks: HookSlot::new(HookKind::MessageReceived),
            connected_hooks: HookSlot::new(HookKind::Connected),
        }
    }

    pub fn register_loop_event_handler(&self, hook: Arc<dyn LoopEventHandler>) {
        debug!(hook_id = %hook.id(), "Registering loop hook");
        self.loop_hooks.register(hook);
    }

    pub fn register_publish_event_handler(&self, hook: Arc<dyn PublishEventHandler>) {
        debug!(hook_id = %hook.id(), "Registering publish hook");
        self.publish_hooks.register(hook);
    }

    pub fn register_message_received_event_handler(
        &self,
        hook: Arc<dyn MessageReceivedEventHandler>,
    ) {
        debug!(hook_id = %hook.id(), "Registering message-received hook");
        self.message_received_hooks.register(hook);
    }

    pub fn register_connected_event_handler(&self, hook: Arc<dyn ConnectedEventHandler>) {
        debug!(hook_id = %hook.id(), "Registering connected hook");
        self.connected_hooks.register(hook);
    }

    /// Remove the hook with `id`, or every loop hook when `id` is `None`
    ///
    /// Returns how many hooks were removed.
    pub fn unregister_loop_event_handler(&self, id: Option<&str>) -> usize {
        self.loop_hooks.unregister(id)
    }

    pub fn unregister_publish_event_handler(&self, id: Option<&str>) -> usize {
        self.publish_hooks.unregister(id)
    }

    pub fn unregister_message_received_event_handler(&self, id: Option<&str>) -> usize {
        self.message_received_hooks.unregister(id)
    }

    pub fn unregister_connected_event_handler(&self, id: Option<&str>) -> usize {
        self.connected_hooks.unregister(id)
    }

    pub fn execute_loop_event_handlers(&self, engine: &dyn Engine, elapsed: Duration) {
        self.loop_hooks.execute(|hook| hook.handle(engine, elapsed));
    }

    pub fn execute_publish_event_handlers(&self, engine: &dyn Engine, event: &PublishEvent) {
        self.publish_hooks.execute(|hook| hook.handle(engine, event));
    }

    pub fn execute_message_received_event_handlers(
        &self,
        engine: &dyn Engine,
        event: &ReceivedEvent,
    ) {
        self.message_received_hooks
            .execute(|hook| hook.handle(engine, event));
    }

    pub fn execute_connected_event_handlers(&self, engine: &dyn Engine, is_auto_reconnect: bool) {
        self.connected_hooks
            .execute(|hook| hook.handle(engine, is_auto_reconnect));
    }

    pub fn all_hooks(&self) -> HookInventory {
        HookInventory {
            loop_hooks: self.loop_hooks.ids(),
            publish_hooks: self.publish_hooks.ids(),
            message_received_hooks: self.message_received_hooks.ids(),
            connected_hooks: self.connected_hooks.ids(),
        }
    }

    pub fn clear_all_hooks(&self) {
        self.loop_hooks.unregister(None);
        self.publish_hooks.unregister(None);
        self.message_received_hooks.unregister(None);
        self.connected_hooks.unregister(None);
    }

    pub fn len(&self, kind: HookKind) -> usize {
        match kind {
            HookKind::Loop => self.loop_hooks.len(),
            HookKind::Publish => self.publish_hooks.len(),
            HookKind::MessageReceived => self.message_received_hooks.len(),
            HookKind::Connected => self.connected_hooks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.all_hooks().total() == 0
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.all_hooks())
            .finish()
    }
}
