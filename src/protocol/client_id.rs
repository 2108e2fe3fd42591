//! MQTT client identifier generation and validation

use uuid::Uuid;

pub const DEFAULT_PREFIX: &str = "mqtt";
pub const MAX_CLIENT_ID_LEN: usize = 65_535;

/// Build `{prefix}_{unique}`, falling back to `mqtt` for a missing or blank prefix
pub fn generate(prefix: Option<&str>) -> String {
    let prefix = match prefix.map(str::trim) {
        Some(p) if !p.is_empty() => p,
        _ => DEFAULT_PREFIX,
    };
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

pub fn is_valid(client_id: &str) -> bool {
    !client_id.is_empty()
        && client_id.len() <= MAX_CLIENT_ID_LEN
        && client_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
