//! Engine configuration.
//!
//! Configuration is per thread, since every reactive graph is confined to
//! the thread that created it. Install a config with
//! [`Runtime::configure`](crate::Runtime::configure); it applies to teardowns
//! scheduled from then on.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Grace window used when nothing else is configured.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_millis(1);

/// Tunables for the reactive engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a derivation stays warm after its last subscription is
    /// disposed, giving a replacement subscription the chance to take over
    /// the cache.
    #[serde(rename = "grace_window_ms", with = "millis")]
    pub grace_window: Duration,
}

impl EngineConfig {
    pub fn with_grace_window(mut self, grace_window: Duration) -> Self {
        self.grace_window = grace_window;
        self
    }

    /// Parse a config from JSON, e.g. `{"grace_window_ms": 10}`.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grace_window: DEFAULT_GRACE_WINDOW,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.grace_window, DEFAULT_GRACE_WINDOW);
    }

    #[test]
    fn grace_window_is_read_in_milliseconds() {
        let config = EngineConfig::from_json(r#"{"grace_window_ms": 25}"#).unwrap();
        assert_eq!(config.grace_window, Duration::from_millis(25));

        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"grace_window_ms":25}"#);
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(EngineConfig::from_json(r#"{"grace_window_ms": "soon"}"#).is_err());
    }
}
