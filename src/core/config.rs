use crate::core::errors::DxtradeError;
use crate::core::types::{OrderResponse, OrderUpdate};
use secrecy::{ExposeSecret, Secret};
use std::collections::{HashMap, HashSet};
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Known broker front-ends, keyed by broker name (upper-cased).
const BROKER_URLS: &[(&str, &str)] = &[
    ("LARK", "https://trade.gooeytrade.com"),
    ("EIGHTCAP", "https://trader.dx-eightcap.com"),
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
    #[cfg(feature = "env-file")]
    #[error("Failed to load environment file: {0}")]
    EnvFileError(String),
}

/// Controls which inbound stream frames get logged at debug level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DebugFilter {
    #[default]
    Disabled,
    All,
    /// Log only envelopes whose wire type is in the set.
    Topics(HashSet<String>),
}

impl DebugFilter {
    /// Parse the user-facing form: `"all"` or a comma-separated topic list.
    pub fn from_str_filter(filter: &str) -> Self {
        if filter.trim().eq_ignore_ascii_case("all") {
            return Self::All;
        }
        let topics: HashSet<String> = filter
            .split(',')
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        if topics.is_empty() {
            Self::Disabled
        } else {
            Self::Topics(topics)
        }
    }

    pub fn should_log(&self, wire_type: &str) -> bool {
        match self {
            Self::Disabled => false,
            Self::All => true,
            Self::Topics(topics) => topics.contains(wire_type),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// Observability hooks invoked alongside (never instead of) the returned
/// results. The error hook fires before any error propagates to the caller.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_error: Option<Arc<dyn Fn(&DxtradeError) + Send + Sync>>,
    pub on_login: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_account_switch: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_order_placed: Option<Arc<dyn Fn(&OrderResponse) + Send + Sync>>,
    pub on_order_update: Option<Arc<dyn Fn(&OrderUpdate) + Send + Sync>>,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_error", &self.on_error.is_some())
            .field("on_login", &self.on_login.is_some())
            .field("on_account_switch", &self.on_account_switch.is_some())
            .field("on_order_placed", &self.on_order_placed.is_some())
            .field("on_order_update", &self.on_order_update.is_some())
            .finish()
    }
}

/// Client configuration. Build with [`DxtradeConfig::new`] and the `with_*`
/// setters, or load credentials from the environment.
#[derive(Debug, Clone)]
pub struct DxtradeConfig {
    pub username: String,
    pub password: Secret<String>,
    /// Broker name, e.g. `"ftmo"`. Resolved to a base URL unless overridden.
    pub broker: String,
    /// Trade on this account instead of the session default.
    pub account_id: Option<String>,
    /// Overrides broker name resolution for the REST base URL.
    pub base_url: Option<String>,
    /// Per-broker URL overrides consulted before the built-in table, keyed
    /// by upper-cased broker name.
    pub broker_urls: HashMap<String, String>,
    /// Overrides the derived stream URL (scheme + host only; path and query
    /// are always appended by the client).
    pub stream_url: Option<String>,
    /// Max attempts for retryable REST calls.
    pub retries: u32,
    /// Budget for handshake and wait-style stream operations.
    pub timeout: Duration,
    pub debug: DebugFilter,
    pub callbacks: Callbacks,
}

impl DxtradeConfig {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        broker: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: Secret::new(password.into()),
            broker: broker.into(),
            account_id: None,
            base_url: None,
            broker_urls: HashMap::new(),
            stream_url: None,
            retries: 3,
            timeout: Duration::from_secs(30),
            debug: DebugFilter::Disabled,
            callbacks: Callbacks::default(),
        }
    }

    /// Load credentials from `DXTRADE_USERNAME`, `DXTRADE_PASSWORD` and
    /// `DXTRADE_BROKER`, with optional `DXTRADE_ACCOUNT_ID` and
    /// `DXTRADE_BASE_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let username = env::var("DXTRADE_USERNAME")
            .map_err(|_| ConfigError::MissingEnvironmentVariable("DXTRADE_USERNAME".into()))?;
        let password = env::var("DXTRADE_PASSWORD")
            .map_err(|_| ConfigError::MissingEnvironmentVariable("DXTRADE_PASSWORD".into()))?;
        let broker = env::var("DXTRADE_BROKER")
            .map_err(|_| ConfigError::MissingEnvironmentVariable("DXTRADE_BROKER".into()))?;

        let mut config = Self::new(username, password, broker);
        config.account_id = env::var("DXTRADE_ACCOUNT_ID").ok();
        config.base_url = env::var("DXTRADE_BASE_URL").ok();
        Ok(config)
    }

    /// Load environment variables from a `.env` file first, then read the
    /// configuration as [`Self::from_env`] does.
    ///
    /// **Security warning**: never commit `.env` files to version control.
    #[cfg(feature = "env-file")]
    pub fn from_env_file() -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(".env")
    }

    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(path: &str) -> Result<Self, ConfigError> {
        if std::path::Path::new(path).exists() {
            dotenv::from_path(path).map_err(|e| ConfigError::EnvFileError(e.to_string()))?;
        }
        Self::from_env()
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_broker_url(mut self, broker: impl Into<String>, url: impl Into<String>) -> Self {
        self.broker_urls.insert(
            broker.into().to_uppercase(),
            url.into().trim_end_matches('/').to_string(),
        );
        self
    }

    pub fn with_stream_url(mut self, stream_url: impl Into<String>) -> Self {
        self.stream_url = Some(stream_url.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_debug(mut self, debug: DebugFilter) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// REST base URL: explicit override, per-broker override map, known
    /// broker table, or the `https://dxtrade.{broker}.com` convention.
    pub fn resolve_base_url(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        let key = self.broker.to_uppercase();
        if let Some(url) = self.broker_urls.get(&key) {
            return url.clone();
        }
        for (name, url) in BROKER_URLS {
            if *name == key {
                return (*url).to_string();
            }
        }
        format!("https://dxtrade.{}.com", self.broker.to_lowercase())
    }
}
