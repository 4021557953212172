//! Client configuration.
//!
//! [`ClientConfig`] is plain data; [`LiveConfig`] wraps it in an `ArcSwap` so settings such as
//! the rate-limit ceiling can be changed while requests are running, without locking the request
//! path.

use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const ENV_MAX_RATELIMIT_TIMEOUT: &str = "BUCKETWISE_MAX_RATELIMIT_TIMEOUT";
pub const ENV_MAX_ATTEMPTS: &str = "BUCKETWISE_MAX_ATTEMPTS";
pub const ENV_USE_CLOCK: &str = "BUCKETWISE_USE_CLOCK";
pub const ENV_USER_AGENT: &str = "BUCKETWISE_USER_AGENT";

pub const DEFAULT_MAX_ATTEMPTS: usize = 5;
pub const DEFAULT_USER_AGENT: &str = concat!("bucketwise/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    #[error("{name} has an invalid value '{value}'")]
    InvalidValue { name: &'static str, value: String },
}

/// Settings consumed by the request executor.
#[derive(Clone, PartialEq)]
pub struct ClientConfig {
    /// Prefix for every route path, e.g. `https://gateway.example/api/v10`.
    pub base_url: String,
    pub token: Option<String>,
    /// Send the token as-is instead of as `Bot <token>`.
    pub raw_token: bool,
    pub user_agent: String,
    /// Longest `retry_after` worth waiting for; `None` waits indefinitely.
    pub max_ratelimit_timeout: Option<Duration>,
    pub max_attempts: usize,
    /// Compute bucket resets from `X-Ratelimit-Reset` and the wall clock.
    pub use_clock: bool,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("raw_token", &self.raw_token)
            .field("user_agent", &self.user_agent)
            .field("max_ratelimit_timeout", &self.max_ratelimit_timeout)
            .field("max_attempts", &self.max_attempts)
            .field("use_clock", &self.use_clock)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            raw_token: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_ratelimit_timeout: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            use_clock: false,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), ..Self::default() }
    }

    /// Defaults overridden by the `BUCKETWISE_*` environment variables.
    pub fn from_env(base_url: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(base_url).with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any `name -> value` lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_RATELIMIT_TIMEOUT) {
            let secs: f64 = parse(ENV_MAX_RATELIMIT_TIMEOUT, &raw)?;
            if !secs.is_finite() || secs < 0.0 {
                return Err(invalid(ENV_MAX_RATELIMIT_TIMEOUT, &raw));
            }
            self.max_ratelimit_timeout = if secs == 0.0 {
                None
            } else {
                let ceiling = Duration::try_from_secs_f64(secs)
                    .map_err(|_| invalid(ENV_MAX_RATELIMIT_TIMEOUT, &raw))?;
                Some(ceiling)
            };
        }
        if let Some(raw) = lookup(ENV_MAX_ATTEMPTS) {
            self.max_attempts = parse(ENV_MAX_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_USE_CLOCK) {
            self.use_clock = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(invalid(ENV_USE_CLOCK, &raw)),
            };
        }
        if let Some(raw) = lookup(ENV_USER_AGENT) {
            if !raw.trim().is_empty() {
                self.user_agent = raw.trim().to_string();
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn raw_token(mut self, raw: bool) -> Self {
        self.raw_token = raw;
        self
    }

    pub fn max_ratelimit_timeout(mut self, ceiling: Option<Duration>) -> Self {
        self.max_ratelimit_timeout = ceiling;
        self
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn use_clock(mut self, use_clock: bool) -> Self {
        self.use_clock = use_clock;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(0));
        }
        Ok(())
    }

    /// The `Authorization` header value for the configured token.
    pub fn authorization(&self) -> Option<String> {
        self.token.as_ref().map(|token| {
            if self.raw_token {
                token.clone()
            } else {
                format!("Bot {}", token)
            }
        })
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| invalid(name, raw))
}

fn invalid(name: &'static str, raw: &str) -> ConfigError {
    ConfigError::InvalidValue { name, value: raw.to_string() }
}

/// Shared, atomically replaceable configuration.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    inner: Arc<ArcSwap<ClientConfig>>,
}

impl LiveConfig {
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { inner: Arc::new(ArcSwap::from_pointee(config)) })
    }

    /// Current configuration snapshot.
    pub fn load(&self) -> Arc<ClientConfig> {
        self.inner.load_full()
    }

    /// Replace the configuration. Requests already running keep the snapshot they started with.
    pub fn store(&self, config: ClientConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.inner.store(Arc::new(config));
        Ok(())
    }

    pub fn set_max_ratelimit_timeout(&self, ceiling: Option<Duration>) {
        self.inner.rcu(|current| {
            let mut next = ClientConfig::clone(current);
            next.max_ratelimit_timeout = ceiling;
            next
        });
    }
}
