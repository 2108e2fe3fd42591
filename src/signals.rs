//! Process signals as a cancellation source for the message loop
//!
//! The factory never installs handlers on its own. Callers opt in through
//! [`crate::ConnectionFactory::subscribe_with_signals`] or by holding the
//! guard returned from [`interrupt_on_signals`] around their own loop.

use crate::transport::TransportHandle;
use futures::stream::StreamExt;
use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook_tokio::{Handle, Signals};
use std::io;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Signals that interrupt a running loop
pub const SHUTDOWN_SIGNALS: [i32; 3] = [SIGTERM, SIGINT, SIGQUIT];

/// Keeps the signal forwarding task alive; closing or dropping it unregisters the handlers
pub struct SignalGuard {
    handle: Handle,
    task: Option<JoinHandle<()>>,
}

impl SignalGuard {
    /// Unregister the handlers and wait for the forwarding task to finish
    pub async fn close(mut self) {
        self.handle.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Call `interrupt()` on `engine` whenever SIGTERM, SIGINT or SIGQUIT arrives
pub fn interrupt_on_signals(engine: TransportHandle) -> io::Result<SignalGuard> {
    let signals = Signals::new(SHUTDOWN_SIGNALS)?;
    let handle = signals.handle();
    let task = tokio::spawn(forward_signals(signals, engine));
    debug!("Installed shutdown signal handlers");
    Ok(SignalGuard {
        handle,
        task: Some(task),
    })
}

async fn forward_signals(mut signals: Signals, engine: TransportHandle) {
    while let Some(signal) = signals.next().await {
        info!(
            signal = signal_name(signal),
            client_id = %engine.client_id(),
            "Received shutdown signal, interrupting message loop"
        );
        engine.interrupt();
    }
}

pub fn signal_name(signal: i32) -> &'static str {
    match signal {
        SIGTERM => "SIGTERM",
        SIGINT => "SIGINT",
        SIGQUIT => "SIGQUIT",
        _ => "unknown",
    }
}
