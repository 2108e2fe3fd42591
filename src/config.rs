//! Declarative connection configuration
//!
//! A [`MqttConfig`] maps connection names to [`ConnectionConfig`] blocks plus
//! the name of the default connection. Nothing is checked when the file is
//! parsed; [`MqttConfig::resolve`] validates one connection completely and
//! produces the [`ResolvedConnection`] the factory builds an engine from.
//! Every check happens before any network attempt.

use crate::error::{ConfigResult, ConfigurationError};
use crate::transport::repository::RepositoryRegistry;
use crate::transport::{
    qos_from_u8, ConnectSettings, LastWillSettings, ReconnectPolicy, TlsSettings,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection name that always refers to the configured default
pub const DEFAULT_CONNECTION: &str = "default";

pub const MAX_TIMEOUT_SECS: i64 = 300;
pub const MAX_KEEP_ALIVE_SECS: i64 = 65_535;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttConfig {
    /// Name of the connection used when callers ask for `"default"`
    #[serde(default = "default_connection_name")]
    pub default: String,
    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,
}

fn default_connection_name() -> String {
    DEFAULT_CONNECTION.to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            default: default_connection_name(),
            connections: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: i64,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Fixed client id; takes precedence over `client_id_prefix`
    pub client_id: Option<String>,
    pub client_id_prefix: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub connection_settings: ConnectionSettingsConfig,
}

fn default_port() -> i64 {
    1883
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            username: None,
            password: None,
            client_id: None,
            client_id_prefix: None,
            logging: LoggingConfig::default(),
            repository: RepositoryConfig::default(),
            connection_settings: ConnectionSettingsConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn with_host(host: &str) -> Self {
        Self {
            host: Some(host.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_log_channel")]
    pub channel: String,
}

fn default_log_channel() -> String {
    "mqtt".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: default_log_channel(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RepositoryConfig {
    /// Registered repository name; the engine's in-memory store when absent
    pub class: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSettingsConfig {
    #[serde(default)]
    pub use_blocking_socket: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: i64,
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout: i64,
    #[serde(default = "default_resend_timeout")]
    pub resend_timeout: i64,
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval: i64,
    #[serde(default)]
    pub reconnect_automatically: bool,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: i64,
    /// Milliseconds
    #[serde(default)]
    pub delay_between_reconnect_attempts: i64,
    #[serde(default)]
    pub last_will: LastWillConfig,
    #[serde(default)]
    pub tls: TlsConfig,
}

fn default_connect_timeout() -> i64 {
    60
}

fn default_socket_timeout() -> i64 {
    5
}

fn default_resend_timeout() -> i64 {
    10
}

fn default_keep_alive_interval() -> i64 {
    10
}

fn default_max_reconnect_attempts() -> i64 {
    3
}

impl Default for ConnectionSettingsConfig {
    fn default() -> Self {
        Self {
            use_blocking_socket: false,
            connect_timeout: default_connect_timeout(),
            socket_timeout: default_socket_timeout(),
            resend_timeout: default_resend_timeout(),
            keep_alive_interval: default_keep_alive_interval(),
            reconnect_automatically: false,
            max_reconnect_attempts: default_max_reconnect_attempts(),
            delay_between_reconnect_attempts: 0,
            last_will: LastWillConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LastWillConfig {
    pub topic: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub quality_of_service: i64,
    #[serde(default)]
    pub retain: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsConfig {
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default = "default_true")]
    pub verify_peer: bool,
    #[serde(default = "default_true")]
    pub verify_peer_name: bool,
    #[serde(default)]
    pub self_signed_allowed: bool,
    pub certificate_authority_file: Option<String>,
    pub certificate_authority_path: Option<String>,
    pub client_certificate_file: Option<String>,
    pub client_certificate_key_file: Option<String>,
    pub client_certificate_key_passphrase: Option<String>,
    #[serde(default)]
    pub alpn: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            use_tls: false,
            verify_peer: true,
            verify_peer_name: true,
            self_signed_allowed: false,
            certificate_authority_file: None,
            certificate_authority_path: None,
            client_certificate_file: None,
            client_certificate_key_file: None,
            client_certificate_key_passphrase: None,
            alpn: Vec::new(),
        }
    }
}

/// A connection that passed validation, ready for engine construction
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConnection {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub client_id: Option<String>,
    pub client_id_prefix: Option<String>,
    pub logging: LoggingConfig,
    pub repository: Option<String>,
    pub settings: ConnectSettings,
}

impl MqttConfig {
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay `MQTT_*` environment variables onto the default connection
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from any lookup; used by [`Self::apply_env_overrides`]
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("MQTT_CONNECTION").filter(|v| !v.is_empty()) {
            self.default = name;
        }

        let name = self.default.clone();
        let connection = self.connections.entry(name.clone()).or_default();

        if let Some(host) = lookup("MQTT_HOST") {
            connection.host = Some(host);
        }
        if let Some(port) = lookup("MQTT_PORT") {
            connection.port = port.trim().parse().map_err(|_| {
                ConfigurationError::invalid(
                    &name,
                    format!("MQTT_PORT must be an integer, got: {port}"),
                )
            })?;
        }
        if let Some(username) = lookup("MQTT_USERNAME") {
            connection.username = Some(username);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            connection.password = Some(password);
        }
        if let Some(client_id) = lookup("MQTT_CLIENT_ID") {
            connection.client_id = Some(client_id);
        }
        if let Some(prefix) = lookup("MQTT_CLIENT_ID_PREFIX") {
            connection.client_id_prefix = Some(prefix);
        }
        Ok(())
    }

    /// Map the `"default"` alias onto the configured default name
    pub fn resolve_name<'a>(&'a self, name: &'a str) -> &'a str {
        if name == DEFAULT_CONNECTION {
            &self.default
        } else {
            name
        }
    }

    pub fn connection<'a>(
        &'a self,
        name: &'a str,
    ) -> ConfigResult<(&'a str, &'a ConnectionConfig)> {
        let resolved = self.resolve_name(name);
        self.connections
            .get(resolved)
            .map(|config| (resolved, config))
            .ok_or_else(|| ConfigurationError::connection_not_found(resolved))
    }

    /// Look up and fully validate one connection
    pub fn resolve(
        &self,
        name: &str,
        repositories: &RepositoryRegistry,
    ) -> ConfigResult<ResolvedConnection> {
        let (resolved, config) = self.connection(name)?;
        validate_connection(resolved, config, repositories)
    }

    /// Validate every configured connection, sorted by name
    pub fn validate_all(
        &self,
        repositories: &RepositoryRegistry,
    ) -> Vec<(String, ConfigResult<ResolvedConnection>)> {
        let mut names: Vec<&String> = self.connections.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| (name.clone(), self.resolve(name, repositories)))
            .collect()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn validate_connection(
    name: &str,
    config: &ConnectionConfig,
    repositories: &RepositoryRegistry,
) -> ConfigResult<ResolvedConnection> {
    let host = non_empty(&config.host)
        .ok_or_else(|| ConfigurationError::missing_parameter(name, "host"))?
        .to_string();

    let port = u16::try_from(config.port)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| {
            ConfigurationError::invalid(
                name,
                format!("port must be an integer between 1 and 65535, got: {}", config.port),
            )
        })?;

    let settings = &config.connection_settings;
    let connect_timeout = bounded_secs(
        name,
        "connect_timeout",
        settings.connect_timeout,
        MAX_TIMEOUT_SECS,
    )?;
    let socket_timeout = bounded_secs(
        name,
        "socket_timeout",
        settings.socket_timeout,
        MAX_TIMEOUT_SECS,
    )?;
    let resend_timeout = bounded_secs(
        name,
        "resend_timeout",
        settings.resend_timeout,
        MAX_TIMEOUT_SECS,
    )?;
    let keep_alive = bounded_secs(
        name,
        "keep_alive_interval",
        settings.keep_alive_interval,
        MAX_KEEP_ALIVE_SECS,
    )?;

    let max_attempts = u32::try_from(settings.max_reconnect_attempts).map_err(|_| {
        ConfigurationError::invalid(
            name,
            format!(
                "max_reconnect_attempts must be a non-negative integer, got: {}",
                settings.max_reconnect_attempts
            ),
        )
    })?;
    let delay_ms = u64::try_from(settings.delay_between_reconnect_attempts).map_err(|_| {
        ConfigurationError::invalid(
            name,
            format!(
                "delay_between_reconnect_attempts must be a non-negative integer, got: {}",
                settings.delay_between_reconnect_attempts
            ),
        )
    })?;

    let last_will = validate_last_will(name, &settings.last_will)?;
    let tls = validate_tls(name, &settings.tls)?;

    let repository = non_empty(&config.repository.class).map(str::to_string);
    if let Some(class) = &repository {
        if !repositories.contains(class) {
            return Err(ConfigurationError::invalid(
                name,
                format!("Repository class '{class}' does not exist"),
            ));
        }
    }

    Ok(ResolvedConnection {
        name: name.to_string(),
        host,
        port,
        client_id: non_empty(&config.client_id).map(str::to_string),
        client_id_prefix: non_empty(&config.client_id_prefix).map(str::to_string),
        logging: config.logging.clone(),
        repository,
        settings: ConnectSettings {
            username: non_empty(&config.username).map(str::to_string),
            password: config.password.clone(),
            clean_session: true,
            use_blocking_socket: settings.use_blocking_socket,
            connect_timeout,
            socket_timeout,
            resend_timeout,
            keep_alive,
            reconnect: ReconnectPolicy {
                enabled: settings.reconnect_automatically,
                max_attempts,
                delay: Duration::from_millis(delay_ms),
            },
            last_will,
            tls,
        },
    })
}

fn bounded_secs(connection: &str, setting: &str, value: i64, max: i64) -> ConfigResult<Duration> {
    if (1..=max).contains(&value) {
        Ok(Duration::from_secs(value as u64))
    } else {
        Err(ConfigurationError::invalid(
            connection,
            format!("{setting} must be an integer between 1 and {max}, got: {value}"),
        ))
    }
}

fn validate_last_will(
    connection: &str,
    will: &LastWillConfig,
) -> ConfigResult<Option<LastWillSettings>> {
    let (topic, message) = match (non_empty(&will.topic), non_empty(&will.message)) {
        (None, None) => return Ok(None),
        (Some(_), None) => {
            return Err(ConfigurationError::invalid(
                connection,
                "last_will.message is required when last_will.topic is set",
            ))
        }
        (None, Some(_)) => {
            return Err(ConfigurationError::invalid(
                connection,
                "last_will.topic is required when last_will.message is set",
            ))
        }
        (Some(topic), Some(message)) => (topic, message),
    };

    let qos = u8::try_from(will.quality_of_service)
        .ok()
        .and_then(qos_from_u8)
        .ok_or_else(|| {
            ConfigurationError::invalid(
                connection,
                format!(
                    "last_will.quality_of_service must be 0, 1, or 2, got: {}",
                    will.quality_of_service
                ),
            )
        })?;

    Ok(Some(LastWillSettings {
        topic: topic.to_string(),
        message: message.to_string(),
        qos,
        retain: will.retain,
    }))
}

fn validate_tls(connection: &str, tls: &TlsConfig) -> ConfigResult<Option<TlsSettings>> {
    let cert = non_empty(&tls.client_certificate_file);
    let key = non_empty(&tls.client_certificate_key_file);
    match (cert, key) {
        (Some(_), None) => {
            return Err(ConfigurationError::invalid(
                connection,
                "tls.client_certificate_key_file is required when tls.client_certificate_file is set",
            ))
        }
        (None, Some(_)) => {
            return Err(ConfigurationError::invalid(
                connection,
                "tls.client_certificate_file is required when tls.client_certificate_key_file is set",
            ))
        }
        _ => {}
    }

    let ca_file = existing_path(
        connection,
        "certificate_authority_file",
        &tls.certificate_authority_file,
        false,
    )?;
    let ca_path = existing_path(
        connection,
        "certificate_authority_path",
        &tls.certificate_authority_path,
        true,
    )?;
    let client_certificate = existing_path(
        connection,
        "client_certificate_file",
        &tls.client_certificate_file,
        false,
    )?;
    let client_key = existing_path(
        connection,
        "client_certificate_key_file",
        &tls.client_certificate_key_file,
        false,
    )?;

    if !tls.use_tls {
        return Ok(None);
    }

    Ok(Some(TlsSettings {
        verify_peer: tls.verify_peer,
        verify_peer_name: tls.verify_peer_name,
        self_signed_allowed: tls.self_signed_allowed,
        ca_file,
        ca_path,
        client_certificate,
        client_key,
        client_key_passphrase: non_empty(&tls.client_certificate_key_passphrase)
            .map(str::to_string),
        alpn: tls.alpn.clone(),
    }))
}

fn existing_path(
    connection: &str,
    setting: &str,
    value: &Option<String>,
    directory: bool,
) -> ConfigResult<Option<PathBuf>> {
    let Some(raw) = value else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Err(ConfigurationError::invalid(
            connection,
            format!("{setting} must be a non-empty string, got: {raw:?}"),
        ));
    }

    let path = PathBuf::from(raw);
    if directory && !path.is_dir() {
        return Err(ConfigurationError::invalid(
            connection,
            format!("Certificate directory does not exist: {raw}"),
        ));
    }
    if !directory && !path.is_file() {
        return Err(ConfigurationError::invalid(
            connection,
            format!("Certificate file does not exist: {raw}"),
        ));
    }
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::QoS;

    fn config_with(connection: ConnectionConfig) -> MqttConfig {
        let mut config = MqttConfig::default();
        config.connections.insert("default".to_string(), connection);
        config
    }

    fn resolve(connection: ConnectionConfig) -> ConfigResult<ResolvedConnection> {
        config_with(connection).resolve("default", &RepositoryRegistry::new())
    }

    fn invalid_reason(result: ConfigResult<ResolvedConnection>) -> String {
        match result {
            Err(ConfigurationError::InvalidConfiguration { reason, .. }) => reason,
            other => panic!("expected InvalidConfiguration, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults() {
        let resolved = resolve(ConnectionConfig::with_host("broker")).unwrap();
        assert_eq!(resolved.port, 1883);
        assert_eq!(resolved.settings.connect_timeout, Duration::from_secs(60));
        assert_eq!(resolved.settings.socket_timeout, Duration::from_secs(5));
        assert_eq!(resolved.settings.resend_timeout, Duration::from_secs(10));
        assert_eq!(resolved.settings.keep_alive, Duration::from_secs(10));
        assert_eq!(resolved.settings.reconnect, ReconnectPolicy::default());
        assert!(resolved.settings.last_will.is_none());
        assert!(resolved.settings.tls.is_none());
        assert!(resolved.repository.is_none());
    }

    #[test]
    fn test_default_alias_resolves_to_configured_name() {
        let mut config = MqttConfig {
            default: "primary".to_string(),
            ..MqttConfig::default()
        };
        config
            .connections
            .insert("primary".to_string(), ConnectionConfig::with_host("broker"));

        assert_eq!(config.resolve_name("default"), "primary");
        assert_eq!(config.resolve_name("other"), "other");

        let resolved = config.resolve("default", &RepositoryRegistry::new()).unwrap();
        assert_eq!(resolved.name, "primary");
    }

    #[test]
    fn test_connection_lookup_returns_resolved_name() {
        let mut config = MqttConfig {
            default: "primary".to_string(),
            ..MqttConfig::default()
        };
        config
            .connections
            .insert("primary".to_string(), ConnectionConfig::with_host("broker"));

        let requested = String::from("default");
        let (name, connection) = config.connection(&requested).unwrap();
        assert_eq!(name, "primary");
        assert_eq!(connection.host.as_deref(), Some("broker"));

        let requested = String::from("primary");
        let (name, _) = config.connection(&requested).unwrap();
        assert_eq!(name, "primary");

        assert!(matches!(
            config.connection("missing"),
            Err(ConfigurationError::ConnectionNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_connection_and_host() {
        let config = MqttConfig::default();
        assert!(matches!(
            config.resolve("nope", &RepositoryRegistry::new()),
            Err(ConfigurationError::ConnectionNotFound { .. })
        ));

        let err = resolve(ConnectionConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MissingParameter { ref parameter, .. } if parameter == "host"
        ));

        let err = resolve(ConnectionConfig::with_host("  ")).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingParameter { .. }));
    }

    #[test]
    fn test_timeout_bounds() {
        for (value, ok) in [(0, false), (1, true), (300, true), (301, false), (-5, false)] {
            let mut connection = ConnectionConfig::with_host("broker");
            connection.connection_settings.socket_timeout = value;
            assert_eq!(resolve(connection).is_ok(), ok, "socket_timeout = {value}");
        }

        let mut connection = ConnectionConfig::with_host("broker");
        connection.connection_settings.keep_alive_interval = 65_535;
        assert!(resolve(connection.clone()).is_ok());
        connection.connection_settings.keep_alive_interval = 65_536;
        assert!(invalid_reason(resolve(connection)).contains("keep_alive_interval"));
    }

    #[test]
    fn test_reconnect_settings() {
        let mut connection = ConnectionConfig::with_host("broker");
        connection.connection_settings.reconnect_automatically = true;
        connection.connection_settings.max_reconnect_attempts = 5;
        connection.connection_settings.delay_between_reconnect_attempts = 250;
        let resolved = resolve(connection.clone()).unwrap();
        assert_eq!(
            resolved.settings.reconnect,
            ReconnectPolicy {
                enabled: true,
                max_attempts: 5,
                delay: Duration::from_millis(250)
            }
        );

        connection.connection_settings.max_reconnect_attempts = -1;
        assert!(invalid_reason(resolve(connection.clone())).contains("max_reconnect_attempts"));

        connection.connection_settings.max_reconnect_attempts = 0;
        connection.connection_settings.delay_between_reconnect_attempts = -1;
        assert!(invalid_reason(resolve(connection)).contains("delay_between_reconnect_attempts"));
    }

    #[test]
    fn test_last_will_pairing_and_qos() {
        let mut connection = ConnectionConfig::with_host("broker");
        connection.connection_settings.last_will.topic = Some("status".to_string());
        assert_eq!(
            invalid_reason(resolve(connection.clone())),
            "last_will.message is required when last_will.topic is set"
        );

        connection.connection_settings.last_will.message = Some("offline".to_string());
        connection.connection_settings.last_will.quality_of_service = 3;
        assert!(invalid_reason(resolve(connection.clone())).contains("0, 1, or 2"));

        connection.connection_settings.last_will.quality_of_service = 1;
        let will = resolve(connection).unwrap().settings.last_will.unwrap();
        assert_eq!(will.topic, "status");
        assert_eq!(will.qos, QoS::AtLeastOnce);
    }

    #[test]
    fn test_tls_pairing_and_files() {
        let mut connection = ConnectionConfig::with_host("broker");
        connection.connection_settings.tls.client_certificate_key_file =
            Some("/tmp/key.pem".to_string());
        assert!(
            invalid_reason(resolve(connection)).contains("client_certificate_file is required")
        );

        let mut connection = ConnectionConfig::with_host("broker");
        connection.connection_settings.tls.certificate_authority_file =
            Some("/nonexistent/ca.pem".to_string());
        assert!(invalid_reason(resolve(connection)).contains("Certificate file does not exist"));

        let mut connection = ConnectionConfig::with_host("broker");
        connection.connection_settings.tls.certificate_authority_path =
            Some("/nonexistent/certs".to_string());
        assert!(
            invalid_reason(resolve(connection)).contains("Certificate directory does not exist")
        );
    }

    #[test]
    fn test_unknown_repository_is_rejected() {
        let mut connection = ConnectionConfig::with_host("broker");
        connection.repository.class = Some("redis".to_string());
        assert!(invalid_reason(resolve(connection.clone())).contains("redis"));

        connection.repository.class = Some("memory".to_string());
        assert_eq!(resolve(connection).unwrap().repository.as_deref(), Some("memory"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = config_with(ConnectionConfig::with_host("old"));
        let vars: HashMap<&str, &str> = [
            ("MQTT_HOST", "new-host"),
            ("MQTT_PORT", "8883"),
            ("MQTT_USERNAME", "alice"),
            ("MQTT_CLIENT_ID_PREFIX", "svc"),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        let connection = &config.connections["default"];
        assert_eq!(connection.host.as_deref(), Some("new-host"));
        assert_eq!(connection.port, 8883);
        assert_eq!(connection.username.as_deref(), Some("alice"));
        assert_eq!(connection.client_id_prefix.as_deref(), Some("svc"));
    }

    #[test]
    fn test_env_override_bad_port() {
        let mut config = config_with(ConnectionConfig::with_host("broker"));
        let result = config.apply_overrides(|key| (key == "MQTT_PORT").then(|| "abc".to_string()));
        assert!(matches!(result, Err(ConfigurationError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_env_override_switches_default_connection() {
        let mut config = config_with(ConnectionConfig::with_host("broker"));
        config
            .apply_overrides(|key| match key {
                "MQTT_CONNECTION" => Some("edge".to_string()),
                "MQTT_HOST" => Some("edge-host".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.default, "edge");
        assert_eq!(config.connections["edge"].host.as_deref(), Some("edge-host"));
        assert_eq!(config.connections["default"].host.as_deref(), Some("broker"));
    }
}
