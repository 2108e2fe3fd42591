//! Hook contracts for engine events
//!
//! There are four hook kinds, one per engine callback slot:
//!
//! - [`LoopEventHandler`] - every iteration of the blocking loop
//! - [`PublishEventHandler`] - every outbound publish
//! - [`MessageReceivedEventHandler`] - every inbound message
//! - [`ConnectedEventHandler`] - every (re)connect
//!
//! Stateful hooks implement the traits directly and keep a [`HookState`];
//! plain closures are wrapped with [`LoopHook`], [`PublishHook`],
//! [`MessageReceivedHook`] or [`ConnectedHook`].

use crate::transport::{Engine, PublishEvent, ReceivedEvent};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

pub mod registry;

pub use registry::{HookInventory, HookKind, HookRegistry};

/// Outcome of a hook callback; errors are logged by the registry, never propagated
pub type HookResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Identity and enablement shared by every hook kind
pub trait Hook: Send + Sync {
    fn id(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }

    fn set_enabled(&self, _enabled: bool) {}
}

pub trait LoopEventHandler: Hook {
    fn handle(&self, engine: &dyn Engine, elapsed: Duration) -> HookResult;
}

pub trait PublishEventHandler: Hook {
    fn handle(&self, engine: &dyn Engine, event: &PublishEvent) -> HookResult;
}

pub trait MessageReceivedEventHandler: Hook {
    fn handle(&self, engine: &dyn Engine, event: &ReceivedEvent) -> HookResult;
}

pub trait ConnectedEventHandler: Hook {
    fn handle(&self, engine: &dyn Engine, is_auto_reconnect: bool) -> HookResult;
}

/// Id plus enabled flag for hook implementations
#[derive(Debug)]
pub struct HookState {
    id: String,
    enabled: AtomicBool,
}

impl HookState {
    /// Use the given id or generate a unique one; hooks start enabled
    pub fn new(id: Option<String>) -> Self {
        Self {
            id: id.unwrap_or_else(generate_hook_id),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

impl Default for HookState {
    fn default() -> Self {
        Self::new(None)
    }
}

pub fn generate_hook_id() -> String {
    format!("hook_{}", Uuid::new_v4().simple())
}

macro_rules! closure_hook {
    ($(#[$meta:meta])* $name:ident: $handler:ident ($($arg:ident: $ty:ty),*)) => {
        $(#[$meta])*
        pub struct $name {
            state: HookState,
            callback: Box<dyn Fn(&dyn Engine, $($ty),*) -> HookResult + Send + Sync>,
        }

        impl $name {
            pub fn new<F>(callback: F, id: Option<String>) -> Self
            where
                F: Fn(&dyn Engine, $($ty),*) -> HookResult + Send + Sync + 'static,
            {
                Self {
                    state: HookState::new(id),
                    callback: Box::new(callback),
                }
            }
        }

        impl Hook for $name {
            fn id(&self) -> &str {
                self.state.id()
            }

            fn is_enabled(&self) -> bool {
                self.state.is_enabled()
            }

            fn set_enabled(&self, enabled: bool) {
                self.state.set_enabled(enabled)
            }
        }

        impl $handler for $name {
            fn handle(&self, engine: &dyn Engine, $($arg: $ty),*) -> HookResult {
                (self.callback)(engine, $($arg),*)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("id", &self.state.id())
                    .field("enabled", &self.state.is_enabled())
                    .finish()
            }
        }
    };
}

closure_hook!(
    /// Closure-backed loop hook
    LoopHook: LoopEventHandler (elapsed: Duration)
);
closure_hook!(
    /// Closure-backed publish hook
    PublishHook: PublishEventHandler (event: &PublishEvent)
);
closure_hook!(
    /// Closure-backed message-received hook
    MessageReceivedHook: MessageReceivedEventHandler (event: &ReceivedEvent)
);
closure_hook!(
    /// Closure-backed connected hook
    ConnectedHook: ConnectedEventHandler (is_auto_reconnect: bool)
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_state_defaults() {
        let state = HookState::new(None);
        assert!(state.id().starts_with("hook_"));
        assert!(state.is_enabled());

        state.set_enabled(false);
        assert!(!state.is_enabled());

        let named = HookState::new(Some("metrics".to_string()));
        assert_eq!(named.id(), "metrics");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(generate_hook_id(), generate_hook_id());
    }

    #[test]
    fn test_closure_hook_identity() {
        let hook = LoopHook::new(|_, _| Ok(()), Some("tick".to_string()));
        assert_eq!(hook.id(), "tick");
        assert!(hook.is_enabled());

        hook.set_enabled(false);
        assert!(!hook.is_enabled());
        assert!(format!("{hook:?}").contains("tick"));
    }
}
