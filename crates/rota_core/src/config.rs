//! Sync configuration.
//!
//! Defaults match the single shared document used by every device; each
//! value can be overridden through `ROTA_*` environment variables.

use log::warn;
use std::time::Duration;

pub const DEFAULT_COLLECTION: &str = "schedules";
pub const DEFAULT_DOCUMENT_ID: &str = "main";
pub const DEFAULT_LOCAL_KEY: &str = "rotation_state";
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

pub const ENV_COLLECTION: &str = "ROTA_COLLECTION";
pub const ENV_DOCUMENT_ID: &str = "ROTA_DOCUMENT_ID";
pub const ENV_LOCAL_KEY: &str = "ROTA_LOCAL_KEY";
pub const ENV_REMOTE_TIMEOUT_MS: &str = "ROTA_REMOTE_TIMEOUT_MS";

/// Addressing and timing for the sync coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Remote collection holding the shared document.
    pub collection: String,
    /// Remote document id.
    pub document_id: String,
    /// Local key-value key for the serialized state.
    pub local_key: String,
    /// Upper bound for each remote call. `None` waits forever.
    pub remote_timeout: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            document_id: DEFAULT_DOCUMENT_ID.to_string(),
            local_key: DEFAULT_LOCAL_KEY.to_string(),
            remote_timeout: Some(DEFAULT_REMOTE_TIMEOUT),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by `lookup`; blank values are ignored.
    ///
    /// `ROTA_REMOTE_TIMEOUT_MS=0` disables the timeout. Unparsable values are
    /// logged and the default is kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(value) = read(ENV_COLLECTION) {
            config.collection = value;
        }
        if let Some(value) = read(ENV_DOCUMENT_ID) {
            config.document_id = value;
        }
        if let Some(value) = read(ENV_LOCAL_KEY) {
            config.local_key = value;
        }
        if let Some(value) = read(ENV_REMOTE_TIMEOUT_MS) {
            match value.parse::<u64>() {
                Ok(0) => config.remote_timeout = None,
                Ok(ms) => config.remote_timeout = Some(Duration::from_millis(ms)),
                Err(_) => warn!(
                    "event=config_load module=config status=error error_code=invalid_timeout key={ENV_REMOTE_TIMEOUT_MS}"
                ),
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::{SyncConfig, DEFAULT_REMOTE_TIMEOUT};
    use std::collections::HashMap;
    use std::time::Duration;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(SyncConfig::from_lookup(|_| None), SyncConfig::default());
    }

    #[test]
    fn overrides_are_trimmed_and_blank_values_ignored() {
        let config = SyncConfig::from_lookup(lookup_from(&[
            ("ROTA_COLLECTION", "  chores "),
            ("ROTA_DOCUMENT_ID", "   "),
            ("ROTA_REMOTE_TIMEOUT_MS", "250"),
        ]));

        assert_eq!(config.collection, "chores");
        assert_eq!(config.document_id, "main");
        assert_eq!(config.remote_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn zero_timeout_disables_and_garbage_keeps_default() {
        let disabled = SyncConfig::from_lookup(lookup_from(&[("ROTA_REMOTE_TIMEOUT_MS", "0")]));
        assert_eq!(disabled.remote_timeout, None);

        let garbage = SyncConfig::from_lookup(lookup_from(&[("ROTA_REMOTE_TIMEOUT_MS", "soon")]));
        assert_eq!(garbage.remote_timeout, Some(DEFAULT_REMOTE_TIMEOUT));
    }
}
