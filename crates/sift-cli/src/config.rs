//! Configuration for the Sift binary.
//!
//! Provides the [`SiftConfig`] struct that loads from TOML files,
//! environment variables, and defaults using the `confyg` crate.
//!
//! # Loading Priority
//!
//! 1. Explicit `--config <path>` flag
//! 2. `SIFT_CONFIG` environment variable
//! 3. XDG default: `~/.config/sift/config.toml`
//! 4. Built-in defaults
//!
//! `SIFT_<SECTION>_<KEY>` environment variables override file values.

use std::collections::BTreeMap;
use std::path::PathBuf;

use confyg::{Confygery, env};
use serde::{Deserialize, Serialize};
use sift_acl::AccessConfig;
use sift_core::{ConfigProvider, Error, Result, SearchSettings};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "SIFT_CONFIG";

// ============================================================================
// Configuration structs
// ============================================================================

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    /// Service name, used in log lines and health output.
    pub service_name: String,

    /// Directory holding persisted space indices.
    pub data_path: Option<String>,

    /// Query bounds and index backend.
    pub search: SearchConfig,

    /// Pushed change intake.
    pub events: EventsConfig,

    /// Filesystem storage the spaces are listed from.
    pub storage: StorageConfig,

    /// HTTP server.
    pub server: ServerConfig,

    /// Static access grants.
    pub access: AccessConfig,

    /// Spaces served by another Sift instance: space id to base URL.
    pub routes: BTreeMap<String, String>,
}

/// Search settings plus the index backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Index backend: `tantivy` (persistent) or `memory`.
    pub backend: String,

    #[serde(flatten)]
    pub settings: SearchSettings,
}

/// Change feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Events buffered before `POST /v0/events` answers 503.
    pub capacity: usize,
}

/// Filesystem storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory whose subdirectories are spaces.
    pub root: Option<String>,

    /// Largest file whose text is extracted, in bytes.
    pub max_text_bytes: u64,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,

    /// Host address to bind to.
    pub host: String,

    /// Shared token of the instance-to-instance routes, also sent to every
    /// routed remote. Unset disables those routes.
    pub internal_token: Option<String>,
}

// ============================================================================
// Default implementations
// ============================================================================

impl Default for SiftConfig {
    fn default() -> Self {
        Self {
            service_name: "sift".to_string(),
            data_path: None,
            search: SearchConfig::default(),
            events: EventsConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            access: AccessConfig::default(),
            routes: BTreeMap::new(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: "tantivy".to_string(),
            settings: SearchSettings::default(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: sift_ingest::DEFAULT_FEED_CAPACITY,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            max_text_bytes: sift_ingest::storage::fs::DEFAULT_MAX_TEXT_BYTES,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9310,
            host: "127.0.0.1".to_string(),
            internal_token: None,
        }
    }
}

// ============================================================================
// Config loading
// ============================================================================

impl SiftConfig {
    /// Load configuration from file, environment, and defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder =
            Confygery::new().map_err(|e| Error::config(format!("config init: {e}")))?;

        if let Some(path) = Self::resolve_config_path(config_path) {
            if path.exists() {
                builder
                    .add_file(&path.to_string_lossy())
                    .map_err(|e| Error::config(format!("config file: {e}")))?;
            }
        }

        let mut env_opts = env::Options::with_top_level("SIFT");
        env_opts.add_section("search");
        env_opts.add_section("events");
        env_opts.add_section("storage");
        env_opts.add_section("server");
        builder
            .add_env(env_opts)
            .map_err(|e| Error::config(format!("config env: {e}")))?;

        let config: Self = builder
            .build()
            .map_err(|e| Error::config(format!("config build: {e}")))?;

        Ok(config)
    }

    /// Resolve the config file path from explicit flag, env var, or XDG default.
    pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        Self::default_config_path()
    }

    /// Return the XDG default config path.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("sift").join("config.toml"))
    }

    /// Storage root with `~` expanded, if configured.
    pub fn storage_root(&self) -> Option<PathBuf> {
        self.storage.root.as_deref().map(expand)
    }

    /// `host:port` the server binds.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Serialize this config to a pretty-printed TOML string.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Flatten this config into environment variable pairs with `SIFT_` prefix.
    pub fn to_env_vars(&self) -> Result<Vec<(String, String)>> {
        let value: toml::Value =
            toml::Value::try_from(self).map_err(|e| Error::config(e.to_string()))?;
        let mut vars = Vec::new();
        flatten_toml_value(&value, "SIFT", &mut vars);
        Ok(vars)
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

// ============================================================================
// ConfigProvider implementation
// ============================================================================

impl ConfigProvider for SiftConfig {
    fn service_name(&self) -> &str {
        &self.service_name
    }

    fn data_path(&self) -> Result<PathBuf> {
        match &self.data_path {
            Some(p) => Ok(expand(p)),
            None => dirs::data_dir()
                .map(|d| d.join("sift"))
                .ok_or_else(|| Error::config("Could not determine a data directory; set data_path")),
        }
    }

    fn search_settings(&self) -> &SearchSettings {
        &self.search.settings
    }
}

// ============================================================================
// Helper: flatten TOML to env vars
// ============================================================================

fn flatten_toml_value(value: &toml::Value, prefix: &str, out: &mut Vec<(String, String)>) {
    match value {
        toml::Value::Table(table) => {
            for (key, val) in table {
                let env_key = format!("{}_{}", prefix, key.to_uppercase());
                flatten_toml_value(val, &env_key, out);
            }
        }
        toml::Value::Array(arr) => {
            if let Ok(json) = serde_json::to_string(arr) {
                out.push((prefix.to_string(), json));
            }
        }
        toml::Value::String(s) => out.push((prefix.to_string(), s.clone())),
        toml::Value::Integer(i) => out.push((prefix.to_string(), i.to_string())),
        toml::Value::Float(f) => out.push((prefix.to_string(), f.to_string())),
        toml::Value::Boolean(b) => out.push((prefix.to_string(), b.to_string())),
        toml::Value::Datetime(dt) => out.push((prefix.to_string(), dt.to_string())),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default() {
        let config = SiftConfig::default();
        assert_eq!(config.service_name, "sift");
        assert_eq!(config.search.backend, "tantivy");
        assert_eq!(config.search.settings.default_page_size, 20);
        assert_eq!(config.events.capacity, sift_ingest::DEFAULT_FEED_CAPACITY);
        assert_eq!(config.server.port, 9310);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_from_toml() {
        let toml_str = r#"
            data_path = "/var/lib/sift"

            [search]
            backend = "memory"
            max_page_size = 50
            space_timeout_ms = 750

            [storage]
            root = "/srv/spaces"

            [access]
            public = ["handbook"]

            [access.grants]
            alice = ["finance", "legal"]

            [routes]
            archive = "http://10.0.0.7:9310"
        "#;

        let config: SiftConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.data_path().unwrap(), PathBuf::from("/var/lib/sift"));
        assert_eq!(config.search.backend, "memory");
        assert_eq!(config.search_settings().max_page_size, 50);
        assert_eq!(config.search_settings().default_page_size, 20);
        assert_eq!(config.search_settings().space_timeout_ms, 750);
        assert_eq!(config.storage_root(), Some(PathBuf::from("/srv/spaces")));
        assert_eq!(config.access.grants[&sift_core::UserId::from("alice")].len(), 2);
        assert_eq!(config.routes["archive"], "http://10.0.0.7:9310");
    }

    #[test]
    fn test_to_toml_round_trip() {
        let config = SiftConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("backend = \"tantivy\""));

        let parsed: SiftConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.search.settings, config.search.settings);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                service_name = "sift-test"
                [server]
                port = 9999
            "#,
        )
        .unwrap();

        let config = SiftConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.service_name(), "sift-test");
        assert_eq!(config.server.port, 9999);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = SiftConfig::load(Some("/nonexistent/sift/config.toml")).unwrap();
        assert_eq!(config.service_name, "sift");
        assert_eq!(config.server.port, 9310);
    }

    #[test]
    fn test_resolve_config_path_explicit() {
        let path = SiftConfig::resolve_config_path(Some("/explicit/config.toml"));
        assert_eq!(path, Some(PathBuf::from("/explicit/config.toml")));
    }

    #[test]
    fn test_tilde_expansion() {
        let config = SiftConfig {
            data_path: Some("~/sift-data".into()),
            ..Default::default()
        };
        let path = config.data_path().unwrap();
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.ends_with("sift-data"));
    }

    #[test]
    fn test_to_env_vars() {
        let config = SiftConfig::default();
        let map: HashMap<_, _> = config.to_env_vars().unwrap().into_iter().collect();
        assert_eq!(map.get("SIFT_SERVICE_NAME").unwrap(), "sift");
        assert_eq!(map.get("SIFT_SERVER_PORT").unwrap(), "9310");
        assert_eq!(map.get("SIFT_SEARCH_BACKEND").unwrap(), "tantivy");
    }

    #[test]
    fn test_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SiftConfig>();
    }
}
