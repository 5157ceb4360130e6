//! Settings: layered configuration for the server and the payload cache.
//!
//! Sources, lowest precedence first:
//!
//! 1. `payload-gate.toml` in the working directory (optional)
//! 2. an explicit file passed to [`load`] (required when given)
//! 3. `PAYLOAD_GATE__*` environment variables, `__` separating sections,
//!    e.g. `PAYLOAD_GATE__CACHE__BUILD_ID=2024-06-01.3`
//!
//! ```toml
//! [server]
//! addr = "127.0.0.1:3000"
//!
//! [cache]
//! build_id = "2024-06-01.3"
//! ttl_secs = 60
//! max_entries = 10000
//! isr_routes = ["/", "/pkg/*"]
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::cache::{DEFAULT_MAX_ENTRIES, DEFAULT_NAMESPACE};
use crate::payload::gate::DEFAULT_TTL_SECS;

const DEFAULT_CONFIG_BASENAME: &str = "payload-gate";
const ENV_PREFIX: &str = "PAYLOAD_GATE";
const DEFAULT_ADDR: &str = "127.0.0.1:3000";

/// Validated settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: String,
}

/// Payload cache settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Identity of the running deployment; part of every cache key.
    pub build_id: String,
    /// Edge TTL. Payload entries are served for twice as long.
    pub ttl: Duration,
    pub namespace: String,
    /// Upper bound on entries held by the in-memory store.
    pub max_entries: usize,
    /// Route patterns whose full-page renders seed the cache.
    pub isr_routes: Vec<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment).
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder =
        Config::builder().add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("cache.isr_routes"),
    );

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    cache: RawCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    addr: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    build_id: Option<String>,
    ttl_secs: Option<u64>,
    namespace: Option<String>,
    max_entries: Option<usize>,
    isr_routes: Option<Vec<String>>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let addr = raw.server.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string());

        let build_id = raw
            .cache
            .build_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| LoadError::invalid("cache.build_id", "must be set to the deployment id"))?;

        let ttl_secs = raw.cache.ttl_secs.unwrap_or(DEFAULT_TTL_SECS);
        if ttl_secs == 0 {
            return Err(LoadError::invalid("cache.ttl_secs", "must be greater than zero"));
        }

        let namespace = raw
            .cache
            .namespace
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        if namespace.is_empty() {
            return Err(LoadError::invalid("cache.namespace", "must not be empty"));
        }

        let max_entries = raw.cache.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES);
        if max_entries == 0 {
            return Err(LoadError::invalid("cache.max_entries", "must be greater than zero"));
        }

        let isr_routes = raw.cache.isr_routes.unwrap_or_default();
        if let Some(bad) = isr_routes.iter().find(|route| !route.starts_with('/')) {
            return Err(LoadError::invalid(
                "cache.isr_routes",
                format!("route pattern `{bad}` must start with `/`"),
            ));
        }

        Ok(Self {
            server: ServerSettings { addr },
            cache: CacheSettings {
                enabled: raw.cache.enabled.unwrap_or(true),
                build_id,
                ttl: Duration::from_secs(ttl_secs),
                namespace,
                max_entries,
                isr_routes,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with_build(build_id: &str) -> RawSettings {
        let mut raw = RawSettings::default();
        raw.cache.build_id = Some(build_id.to_string());
        raw
    }

    #[test]
    fn defaults_apply() {
        let settings = Settings::from_raw(raw_with_build("b1")).expect("valid settings");
        assert_eq!(settings.server.addr, DEFAULT_ADDR);
        assert!(settings.cache.enabled);
        assert_eq!(settings.cache.ttl, Duration::from_secs(60));
        assert_eq!(settings.cache.namespace, DEFAULT_NAMESPACE);
        assert_eq!(settings.cache.max_entries, DEFAULT_MAX_ENTRIES);
        assert!(settings.cache.isr_routes.is_empty());
    }

    #[test]
    fn zero_max_entries_is_rejected() {
        let mut raw = raw_with_build("b1");
        raw.cache.max_entries = Some(0);
        let err = Settings::from_raw(raw).unwrap_err();
        assert!(matches!(err, LoadError::Invalid { key: "cache.max_entries", .. }));
    }

    #[test]
    fn build_id_is_required() {
        let err = Settings::from_raw(RawSettings::default()).unwrap_err();
        assert!(matches!(err, LoadError::Invalid { key: "cache.build_id", .. }));

        let err = Settings::from_raw(raw_with_build("   ")).unwrap_err();
        assert!(matches!(err, LoadError::Invalid { key: "cache.build_id", .. }));
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut raw = raw_with_build("b1");
        raw.cache.ttl_secs = Some(0);
        let err = Settings::from_raw(raw).unwrap_err();
        assert!(matches!(err, LoadError::Invalid { key: "cache.ttl_secs", .. }));
    }

    #[test]
    fn relative_route_patterns_are_rejected() {
        let mut raw = raw_with_build("b1");
        raw.cache.isr_routes = Some(vec!["/".to_string(), "pkg/*".to_string()]);
        let err = Settings::from_raw(raw).unwrap_err();
        assert!(matches!(err, LoadError::Invalid { key: "cache.isr_routes", .. }));
    }

    #[test]
    fn loads_from_toml_file() {
        let path = std::env::temp_dir().join(format!("payload-gate-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[server]\naddr = \"0.0.0.0:8080\"\n\n[cache]\nbuild_id = \"deploy-42\"\nttl_secs = 30\nmax_entries = 256\nisr_routes = [\"/pkg/*\"]\n",
        )
        .unwrap();

        let settings = load(Some(&path)).expect("valid settings");
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.server.addr, "0.0.0.0:8080");
        assert_eq!(settings.cache.build_id, "deploy-42");
        assert_eq!(settings.cache.ttl, Duration::from_secs(30));
        assert_eq!(settings.cache.max_entries, 256);
        assert_eq!(settings.cache.isr_routes, vec!["/pkg/*".to_string()]);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let path = std::env::temp_dir().join("payload-gate-does-not-exist.toml");
        assert!(matches!(load(Some(&path)), Err(LoadError::Build(_))));
    }
}
