//! Server configuration with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerConfig::default()`]
//! 2. If a config file is given and exists, deep-merge its values over defaults
//! 3. Apply `ELIGOS_*` environment variable overrides (highest priority)
//!
//! The JWT signing key is only ever taken from `ELIGOS_JWT_KEY`.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use eligos_hub::{HubConfig, HubError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ELIGOS_JWT_KEY is not set")]
    MissingJwtKey,

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

impl From<HubError> for ConfigError {
    fn from(e: HubError) -> Self {
        ConfigError::InvalidValue(e.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// 0 picks a free port.
    pub port: u16,
    pub db_path: PathBuf,
    pub token_ttl_days: i64,
    pub bcrypt_cost: u32,
    pub hub: HubConfig,
    #[serde(skip)]
    pub jwt_secret: Option<SecretString>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4000,
            db_path: data_dir().join("eligos.db"),
            token_ttl_days: 100,
            bcrypt_cost: 12,
            hub: HubConfig::default(),
            jwt_secret: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Everything `start` needs to be present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_none() {
            return Err(ConfigError::MissingJwtKey);
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::InvalidValue(format!(
                "bcrypt_cost must be within 4..=31, got {}",
                self.bcrypt_cost
            )));
        }
        if self.token_ttl_days <= 0 {
            return Err(ConfigError::InvalidValue("token_ttl_days must be positive".into()));
        }
        self.hub.validate()?;
        Ok(())
    }
}

/// `~/.eligos`
pub fn data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".eligos")
}

/// Load configuration: defaults, then the optional JSON file, then env vars.
///
/// A missing file means defaults; an unreadable or invalid one is an error.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let defaults = serde_json::to_value(ServerConfig::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading config from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "config file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut config: ServerConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, everything else is replaced by `source`, and
/// nulls in `source` leave the target untouched.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

pub fn apply_env_overrides(config: &mut ServerConfig) {
    apply_overrides_from(config, |name| std::env::var(name).ok());
}

/// Invalid values are logged and ignored.
fn apply_overrides_from(config: &mut ServerConfig, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let number = |name: &str, min: u64, max: u64| -> Option<u64> {
        let raw = string(name)?;
        match raw.parse::<u64>() {
            Ok(v) if (min..=max).contains(&v) => Some(v),
            _ => {
                warn!(key = name, value = %raw, "invalid numeric env var, ignoring");
                None
            }
        }
    };

    if let Some(v) = string("ELIGOS_HOST") {
        config.host = v;
    }
    if let Some(v) = number("ELIGOS_PORT", 0, u64::from(u16::MAX)) {
        config.port = v as u16;
    }
    if let Some(v) = string("ELIGOS_DB_PATH") {
        config.db_path = PathBuf::from(v);
    }
    if let Some(v) = string("ELIGOS_JWT_KEY") {
        config.jwt_secret = Some(SecretString::from(v));
    }
    if let Some(v) = number("ELIGOS_MAX_FRAME_BYTES", 64, 16 * 1024 * 1024) {
        config.hub.max_frame_bytes = v as usize;
    }
    if let Some(v) = number("ELIGOS_OUTBOUND_QUEUE", 1, 1_000_000) {
        config.hub.outbound_queue_capacity = v as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn deep_merge_nested_objects() {
        let merged = deep_merge(
            json!({"port": 4000, "hub": {"max_frame_bytes": 512, "pong_wait_ms": 60000}}),
            json!({"hub": {"max_frame_bytes": 2048}, "host": null}),
        );
        assert_eq!(merged["port"], 4000);
        assert_eq!(merged["hub"]["max_frame_bytes"], 2048);
        assert_eq!(merged["hub"]["pong_wait_ms"], 60000);
        assert!(merged.get("host").is_none());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = load_config(Some(Path::new("/nonexistent/eligos.json"))).unwrap();
        assert_eq!(cfg.hub, HubConfig::default());
        assert_eq!(cfg.token_ttl_days, 100);
    }

    #[test]
    fn file_values_override_defaults() {
        let path = std::env::temp_dir().join(format!("eligos-config-{}.json", uuid::Uuid::now_v7()));
        std::fs::write(&path, r#"{"bcrypt_cost": 4, "hub": {"outbound_queue_capacity": 8}}"#).unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.bcrypt_cost, 4);
        assert_eq!(cfg.hub.outbound_queue_capacity, 8);
        assert_eq!(cfg.hub.max_frame_bytes, 512);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let path = std::env::temp_dir().join(format!("eligos-config-{}.json", uuid::Uuid::now_v7()));
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(ConfigError::Json(_))));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = ServerConfig::default();
        apply_overrides_from(
            &mut cfg,
            env(&[
                ("ELIGOS_HOST", "127.0.0.1"),
                ("ELIGOS_PORT", "8080"),
                ("ELIGOS_JWT_KEY", "k3y"),
                ("ELIGOS_MAX_FRAME_BYTES", "1024"),
                ("ELIGOS_OUTBOUND_QUEUE", "16"),
            ]),
        );
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8080");
        assert_eq!(cfg.jwt_secret.as_ref().unwrap().expose_secret(), "k3y");
        assert_eq!(cfg.hub.max_frame_bytes, 1024);
        assert_eq!(cfg.hub.outbound_queue_capacity, 16);
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut cfg = ServerConfig::default();
        apply_overrides_from(
            &mut cfg,
            env(&[("ELIGOS_PORT", "http"), ("ELIGOS_OUTBOUND_QUEUE", "0"), ("ELIGOS_HOST", "")]),
        );
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.hub.outbound_queue_capacity, 256);
        assert_eq!(cfg.host, "0.0.0.0");
    }

    #[test]
    fn validate_requires_jwt_key() {
        let mut cfg = ServerConfig::default();
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingJwtKey)));
        cfg.jwt_secret = Some(SecretString::from("k".to_string()));
        assert!(cfg.validate().is_ok());
        cfg.hub.ping_interval_ms = cfg.hub.pong_wait_ms;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn secret_never_serialized() {
        let cfg = ServerConfig {
            jwt_secret: Some(SecretString::from("hunter2".to_string())),
            ..ServerConfig::default()
        };
        let text = serde_json::to_string(&cfg).unwrap();
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("jwt_secret"));
    }
}
