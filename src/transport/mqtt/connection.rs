//! Pure translation of connect settings into rumqttc options
//!
//! Everything here is synchronous and side-effect free apart from reading
//! certificate files, which keeps option building testable without a broker.

use crate::transport::{ConnectSettings, EngineError, EngineParams, TlsSettings};
use rumqttc::{LastWill, MqttOptions, TlsConfiguration, Transport};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Connection lifecycle as tracked by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting(u32),
    Disconnected,
    /// Reconnect policy exhausted or disabled after a network failure
    Lost(String),
}

/// Build rumqttc options from validated settings
pub fn configure_mqtt_options(
    params: &EngineParams,
    settings: &ConnectSettings,
) -> Result<MqttOptions, EngineError> {
    let mut options = MqttOptions::new(params.client_id.clone(), params.host.clone(), params.port);

    options.set_keep_alive(settings.keep_alive);
    options.set_clean_session(settings.clean_session);

    if let Some(username) = &settings.username {
        let password = settings.password.clone().unwrap_or_default();
        options.set_credentials(username.clone(), password);
    }

    if let Some(will) = &settings.last_will {
        options.set_last_will(LastWill::new(
            will.topic.clone(),
            will.message.clone().into_bytes(),
            will.qos,
            will.retain,
        ));
    }

    if let Some(tls) = &settings.tls {
        options.set_transport(build_tls_transport(tls)?);
    }

    Ok(options)
}

/// Build a TLS transport from certificate files
///
/// Without a CA the platform defaults are used, which cannot carry a client
/// certificate or ALPN list.
pub fn build_tls_transport(tls: &TlsSettings) -> Result<Transport, EngineError> {
    if !tls.verify_peer || !tls.verify_peer_name || tls.self_signed_allowed {
        warn!(
            verify_peer = tls.verify_peer,
            verify_peer_name = tls.verify_peer_name,
            self_signed_allowed = tls.self_signed_allowed,
            "Relaxed TLS verification is not supported, peers are always verified"
        );
    }
    if tls.client_key_passphrase.is_some() {
        warn!("Client key passphrases are ignored, the key file must be unencrypted PEM");
    }

    let ca = load_ca_bundle(tls)?;
    let client_auth = match (&tls.client_certificate, &tls.client_key) {
        (Some(cert), Some(key)) => Some((
            read_pem(cert, "client certificate")?,
            read_pem(key, "client key")?,
        )),
        _ => None,
    };
    let alpn = if tls.alpn.is_empty() {
        None
    } else {
        Some(tls.alpn.iter().map(|p| p.as_bytes().to_vec()).collect())
    };

    match ca {
        Some(ca) => Ok(Transport::tls_with_config(TlsConfiguration::Simple {
            ca,
            alpn,
            client_auth,
        })),
        None if client_auth.is_none() && alpn.is_none() => Ok(Transport::tls_with_default_config()),
        None => Err(EngineError::Tls(
            "client certificates and ALPN require a CA file or CA path".to_string(),
        )),
    }
}

/// Concatenate the CA file and every `.pem`/`.crt` file in the CA directory
pub fn load_ca_bundle(tls: &TlsSettings) -> Result<Option<Vec<u8>>, EngineError> {
    let mut bundle = Vec::new();

    if let Some(file) = &tls.ca_file {
        bundle.extend(read_pem(file, "CA file")?);
    }

    if let Some(dir) = &tls.ca_path {
        let entries = fs::read_dir(dir).map_err(|e| {
            EngineError::Tls(format!("failed to read CA path '{}': {e}", dir.display()))
        })?;

        let mut files: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && matches!(
                        path.extension().and_then(|e| e.to_str()),
                        Some("pem") | Some("crt")
                    )
            })
            .collect();
        files.sort();

        for path in files {
            debug!(path = %path.display(), "Adding CA certificate");
            if !bundle.is_empty() && !bundle.ends_with(b"\n") {
                bundle.push(b'\n');
            }
            bundle.extend(read_pem(&path, "CA certificate")?);
        }
    }

    Ok(if bundle.is_empty() { None } else { Some(bundle) })
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>, EngineError> {
    fs::read(path)
        .map_err(|e| EngineError::Tls(format!("failed to read {what} '{}': {e}", path.display())))
}
