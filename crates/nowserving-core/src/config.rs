//! Configuration loading and typed config structures for nowserving.
//!
//! Configuration lives in `nowserving.yaml` (or the file named by
//! `$NOWSERVING_CONFIG`). Every section and field has a default, so an
//! absent or empty file yields a working push server on port 3001 with an
//! in-memory store. Deployment platforms configure the process through the
//! environment; see [`NowservingConfig::apply_env_overrides`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::mutate::QueueRules;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "NOWSERVING_CONFIG";

/// Config file read when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "nowserving.yaml";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NowservingConfig {
    /// Listener and transport selection.
    #[serde(default)]
    pub server: ServerConfig,

    /// Durable store used by the pull transport.
    #[serde(default)]
    pub store: StoreConfig,

    /// Document shape bounds.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Subscription façade timing.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NowservingConfig {
    /// Load from `$NOWSERVING_CONFIG`, or `./nowserving.yaml` if that exists,
    /// or defaults. Environment overrides are applied and the result is
    /// validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if an explicitly named file cannot be
    /// read, [`ConfigError::Yaml`] for bad YAML, and
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_default_location()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Read `$NOWSERVING_CONFIG`, or `./nowserving.yaml` if that exists, or
    /// fall back to defaults. Nothing is overridden or validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if an explicitly named file cannot be
    /// read, or [`ConfigError::Yaml`] for bad YAML.
    pub fn from_default_location() -> Result<Self, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Self::from_file(Path::new(&path));
        }
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from a YAML file. No environment overrides are
    /// applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Apply overrides from the process environment:
    ///
    /// - `HOST`, `PORT` override `server.host` and `server.port`
    /// - `QUEUE_TRANSPORT` overrides `server.transport`
    /// - `QUEUE_STORE` overrides `store.backend`
    /// - `REDIS_URL` overrides `store.redis_url`
    /// - `UPSTASH_REDIS_REST_URL` overrides `store.rest_url`
    /// - `UPSTASH_REDIS_REST_TOKEN` overrides `store.rest_token`
    /// - `QUEUE_LOCAL_DIR` overrides `store.local_dir`
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_with(|name| std::env::var(name).ok());
    }

    /// Apply overrides using `lookup` in place of the process environment.
    pub fn apply_env_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |names: &[&str]| names.iter().find_map(|name| lookup(name));

        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            match port.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(e) => tracing::warn!(value = %port, error = %e, "ignoring invalid PORT"),
            }
        }
        if let Some(transport) = lookup("QUEUE_TRANSPORT") {
            match transport.parse() {
                Ok(mode) => self.server.transport = mode,
                Err(e) => tracing::warn!(error = %e, "ignoring QUEUE_TRANSPORT"),
            }
        }
        if let Some(backend) = lookup("QUEUE_STORE") {
            match backend.parse() {
                Ok(backend) => self.store.backend = backend,
                Err(e) => tracing::warn!(error = %e, "ignoring QUEUE_STORE"),
            }
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.store.redis_url = Some(url);
        }
        if let Some(url) = first(&[
            "UPSTASH_REDIS_REST_URL",
            "UPSTASH_REDIS_REST_KV_REST_API_URL",
            "UPSTASH_REDIS_REST_REDIS_URL",
        ]) {
            self.store.rest_url = Some(url);
        }
        if let Some(token) = first(&[
            "UPSTASH_REDIS_REST_TOKEN",
            "UPSTASH_REDIS_REST_KV_REST_API_TOKEN",
        ]) {
            self.store.rest_token = Some(token);
        }
        if let Some(dir) = lookup("QUEUE_LOCAL_DIR") {
            self.store.local_dir = Some(PathBuf::from(dir));
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_owned()));

        if self.queue.default_counters == 0 {
            return invalid("queue.default_counters must be at least 1");
        }
        if self.queue.max_counters < self.queue.default_counters {
            return invalid("queue.max_counters must be at least queue.default_counters");
        }
        if self.client.poll_interval_ms == 0 {
            return invalid("client.poll_interval_ms must be positive");
        }
        if self.client.reconnect_initial_ms == 0
            || self.client.reconnect_initial_ms > self.client.reconnect_max_ms
        {
            return invalid("client.reconnect_initial_ms must be positive and at most reconnect_max_ms");
        }
        if self.store.timeout_ms == 0 {
            return invalid("store.timeout_ms must be positive");
        }
        if self.store.key.is_empty() {
            return invalid("store.key must not be empty");
        }

        if self.server.transport == TransportMode::Pull {
            match self.store.backend {
                StoreBackend::Rest if self.store.rest_url.is_none() || self.store.rest_token.is_none() => {
                    return invalid(
                        "the rest store needs UPSTASH_REDIS_REST_URL and UPSTASH_REDIS_REST_TOKEN",
                    );
                }
                StoreBackend::Redis if self.store.redis_url.is_none() => {
                    return invalid("the redis store needs REDIS_URL");
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Which transport the server process runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Persistent WebSocket connections over an in-memory document.
    #[default]
    Push,
    /// Stateless request handlers over a durable store.
    Pull,
}

impl TransportMode {
    /// Lowercase name, as accepted in config and the environment.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

impl FromStr for TransportMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "push" | "websocket" | "ws" => Ok(Self::Push),
            "pull" | "poll" | "rest" => Ok(Self::Pull),
            other => Err(ConfigError::Invalid(format!("unknown transport `{other}`"))),
        }
    }
}

/// Which key-value store backs the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local slot.
    #[default]
    Memory,
    /// Redis protocol.
    Redis,
    /// Upstash-compatible REST API.
    Rest,
    /// JSON file on the local disk.
    Local,
}

impl StoreBackend {
    /// Lowercase name, as accepted in config and the environment.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
            Self::Rest => "rest",
            Self::Local => "local",
        }
    }
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            "rest" | "upstash" => Ok(Self::Rest),
            "local" | "file" => Ok(Self::Local),
            other => Err(ConfigError::Invalid(format!("unknown store `{other}`"))),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport served by this process.
    #[serde(default)]
    pub transport: TransportMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportMode::default(),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Key holding the document.
    #[serde(default = "default_store_key")]
    pub key: String,

    /// Upper bound on a single store operation, in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,

    /// Redis connection URL.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Base URL of the REST key-value API.
    #[serde(default)]
    pub rest_url: Option<String>,

    /// Bearer token for the REST key-value API.
    #[serde(default)]
    pub rest_token: Option<String>,

    /// Directory holding local document files. Defaults to `.nowserving`.
    #[serde(default)]
    pub local_dir: Option<PathBuf>,
}

impl StoreConfig {
    /// [`Self::timeout_ms`] as a [`Duration`].
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The local store directory, falling back to `.nowserving`.
    pub fn local_dir_or_default(&self) -> PathBuf {
        self.local_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".nowserving"))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            key: default_store_key(),
            timeout_ms: default_store_timeout_ms(),
            redis_url: None,
            rest_url: None,
            rest_token: None,
            local_dir: None,
        }
    }
}

/// Document shape configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueConfig {
    /// Counters in a freshly initialized document.
    #[serde(default = "default_counters")]
    pub default_counters: u32,

    /// Largest counter count a resize or auto-grow may produce.
    #[serde(default = "default_max_counters")]
    pub max_counters: u32,
}

impl QueueConfig {
    /// The mutator bounds this section describes.
    pub const fn rules(&self) -> QueueRules {
        QueueRules {
            default_counters: self.default_counters,
            max_counters: self.max_counters,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_counters: default_counters(),
            max_counters: default_max_counters(),
        }
    }
}

/// Subscription façade timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// Interval between poll reads.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// First reconnect delay after a dropped push connection.
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    /// Ceiling of the reconnect delay.
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl ClientConfig {
    /// [`Self::poll_interval_ms`] as a [`Duration`].
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// [`Self::reconnect_initial_ms`] as a [`Duration`].
    pub const fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    /// [`Self::reconnect_max_ms`] as a [`Duration`].
    pub const fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions for serde
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_port() -> u16 {
    3001
}

fn default_store_key() -> String {
    nowserving_types::STATE_KEY.to_owned()
}

const fn default_store_timeout_ms() -> u64 {
    2000
}

const fn default_counters() -> u32 {
    nowserving_types::DEFAULT_COUNTER_COUNT
}

const fn default_max_counters() -> u32 {
    999
}

const fn default_poll_interval_ms() -> u64 {
    1500
}

const fn default_reconnect_initial_ms() -> u64 {
    500
}

const fn default_reconnect_max_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = NowservingConfig::default();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.server.transport, TransportMode::Push);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.key, "queue:state");
        assert_eq!(config.store.timeout(), Duration::from_millis(2000));
        assert_eq!(config.queue.rules(), QueueRules::default());
        assert_eq!(config.client.poll_interval(), Duration::from_millis(1500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080
  transport: pull

store:
  backend: rest
  key: "queue:test"
  timeout_ms: 500
  rest_url: "https://kv.example.com"
  rest_token: "secret"

queue:
  default_counters: 4
  max_counters: 20

client:
  poll_interval_ms: 250
  reconnect_initial_ms: 100
  reconnect_max_ms: 800

logging:
  level: "debug"
  json: true
"#;
        let config = NowservingConfig::parse(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.transport, TransportMode::Pull);
        assert_eq!(config.store.backend, StoreBackend::Rest);
        assert_eq!(config.store.rest_token.as_deref(), Some("secret"));
        assert_eq!(config.queue.rules().max_counters, 20);
        assert_eq!(config.client.reconnect_max(), Duration::from_millis(800));
        assert!(config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = NowservingConfig::parse("server:\n  port: 9000\n").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.queue.default_counters, 8);
    }

    #[test]
    fn parse_empty_yaml() {
        assert_eq!(
            NowservingConfig::parse("").unwrap(),
            NowservingConfig::default()
        );
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = NowservingConfig::default();
        config.apply_env_overrides_with(env(&[
            ("PORT", "4000"),
            ("QUEUE_TRANSPORT", "pull"),
            ("QUEUE_STORE", "rest"),
            ("UPSTASH_REDIS_REST_KV_REST_API_URL", "https://fallback.example.com"),
            ("UPSTASH_REDIS_REST_TOKEN", "t0k"),
        ]));
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.transport, TransportMode::Pull);
        assert_eq!(config.store.backend, StoreBackend::Rest);
        assert_eq!(
            config.store.rest_url.as_deref(),
            Some("https://fallback.example.com")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn primary_rest_url_beats_fallbacks() {
        let mut config = NowservingConfig::default();
        config.apply_env_overrides_with(env(&[
            ("UPSTASH_REDIS_REST_URL", "https://primary"),
            ("UPSTASH_REDIS_REST_REDIS_URL", "https://secondary"),
        ]));
        assert_eq!(config.store.rest_url.as_deref(), Some("https://primary"));
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut config = NowservingConfig::default();
        config.apply_env_overrides_with(env(&[("PORT", "eighty"), ("QUEUE_STORE", "floppy")]));
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn pull_over_rest_needs_credentials() {
        let mut config = NowservingConfig::default();
        config.server.transport = TransportMode::Pull;
        config.store.backend = StoreBackend::Rest;
        config.store.rest_url = Some("https://kv.example.com".to_owned());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.store.rest_token = Some("t".to_owned());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn queue_bounds_are_checked() {
        let mut config = NowservingConfig::default();
        config.queue.max_counters = 2;
        assert!(config.validate().is_err());
        config.queue.max_counters = 8;
        config.queue.default_counters = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_bounds_are_checked() {
        let mut config = NowservingConfig::default();
        config.client.reconnect_initial_ms = 10_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn transport_names_parse() {
        assert_eq!("PUSH".parse::<TransportMode>().unwrap(), TransportMode::Push);
        assert_eq!("poll".parse::<TransportMode>().unwrap(), TransportMode::Pull);
        assert!("carrier-pigeon".parse::<TransportMode>().is_err());
        assert_eq!(StoreBackend::Local.as_str(), "local");
    }
}
