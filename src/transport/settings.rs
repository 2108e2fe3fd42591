//! Fully-resolved connect settings handed to an engine
//!
//! These are produced from a validated [`crate::config::ConnectionConfig`];
//! by the time an engine sees them every bound and pairing rule holds.

use rumqttc::QoS;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectSettings {
    pub username: Option<String>,
    pub password: Option<String>,
    pub clean_session: bool,
    pub use_blocking_socket: bool,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    pub resend_timeout: Duration,
    pub keep_alive: Duration,
    pub reconnect: ReconnectPolicy,
    pub last_will: Option<LastWillSettings>,
    pub tls: Option<TlsSettings>,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            clean_session: true,
            use_blocking_socket: false,
            connect_timeout: Duration::from_secs(60),
            socket_timeout: Duration::from_secs(5),
            resend_timeout: Duration::from_secs(10),
            keep_alive: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            last_will: None,
            tls: None,
        }
    }
}

/// Automatic reconnect behaviour applied by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 3,
            delay: Duration::ZERO,
        }
    }
}

impl ReconnectPolicy {
    /// Whether attempt number `attempt` (1-based) is still allowed
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && attempt <= self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LastWillSettings {
    pub topic: String,
    pub message: String,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub verify_peer: bool,
    pub verify_peer_name: bool,
    pub self_signed_allowed: bool,
    pub ca_file: Option<PathBuf>,
    pub ca_path: Option<PathBuf>,
    pub client_certificate: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub client_key_passphrase: Option<String>,
    pub alpn: Vec<String>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            verify_peer: true,
            verify_peer_name: true,
            self_signed_allowed: false,
            ca_file: None,
            ca_path: None,
            client_certificate: None,
            client_key: None,
            client_key_passphrase: None,
            alpn: Vec::new(),
        }
    }
}
