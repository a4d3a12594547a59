//! Client configuration, built programmatically or from the environment.
//!
//! Follows 12-factor style: [`ClientConfig::from_env`] reads `MAAS_*`
//! environment variables (or a `.env` file via `dotenvy`) and falls back to
//! defaults suitable for a local MAAS region controller.

use std::time::Duration;

use url::Url;

use crate::error::ClientError;

/// Base URL used when neither `MAAS_WS_URL` nor `MAAS_URL` is set.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5240/MAAS";

/// Websocket path appended to the base URL.
pub const DEFAULT_WS_PATH: &str = "ws";

/// Query parameter carrying the CSRF token.
pub const CSRF_QUERY_PARAM: &str = "csrftoken";

/// Automatic reconnection policy.
///
/// Reconnection starts a fresh connection; requests that were pending on
/// the lost socket have already been rejected and are never resent.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Master switch. Disabled by default.
    pub enabled: bool,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound for the backoff delay.
    pub max_delay: Duration,
    /// Factor applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
    /// Give up after this many consecutive attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// An enabled policy with the default backoff.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Sets the delay before the first attempt.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum backoff delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Limits the number of consecutive attempts.
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Delay before attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let scaled = self.initial_delay.as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }

    /// Returns `true` if another attempt is allowed after `attempts_made`.
    #[must_use]
    pub fn allows(&self, attempts_made: u32) -> bool {
        self.enabled && self.max_attempts.is_none_or(|max| attempts_made < max)
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Websocket endpoint (`ws://` or `wss://`).
    pub endpoint: Url,

    /// Handshake timeout for `connect()` and reconnect attempts.
    pub connect_timeout: Duration,

    /// Caller-side timeout for `send()`. `None` waits until the response
    /// arrives or the connection closes.
    pub request_timeout: Option<Duration>,

    /// Automatic reconnection policy.
    pub reconnect: ReconnectPolicy,

    /// Capacity of the connection [`crate::domain::EventBus`].
    pub event_bus_capacity: usize,
}

impl ClientConfig {
    /// Creates a configuration for `endpoint` with default policies.
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            reconnect: ReconnectPolicy::default(),
            event_bus_capacity: 256,
        }
    }

    /// Parses `endpoint` and creates a configuration for it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the URL is invalid or its scheme
    /// is not `ws`/`wss`.
    pub fn for_url(endpoint: &str) -> Result<Self, ClientError> {
        let url = Url::parse(endpoint)?;
        check_ws_scheme(&url)?;
        Ok(Self::new(url))
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the caller-side request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the reconnection policy.
    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// `MAAS_WS_URL` overrides the endpoint entirely; otherwise it is built
    /// from `MAAS_URL`, `MAAS_WS_PATH` and `MAAS_CSRF_TOKEN` with
    /// [`build_endpoint`]. Calls `dotenvy::dotenv().ok()` to optionally load
    /// a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the resulting endpoint is invalid.
    pub fn from_env() -> Result<Self, ClientError> {
        dotenvy::dotenv().ok();

        let endpoint = match std::env::var("MAAS_WS_URL") {
            Ok(raw) => {
                let url = Url::parse(&raw)?;
                check_ws_scheme(&url)?;
                url
            }
            Err(_) => {
                let base =
                    std::env::var("MAAS_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
                let path =
                    std::env::var("MAAS_WS_PATH").unwrap_or_else(|_| DEFAULT_WS_PATH.to_string());
                let csrf = std::env::var("MAAS_CSRF_TOKEN").ok();
                build_endpoint(&base, &path, csrf.as_deref())?
            }
        };

        let connect_timeout = Duration::from_millis(parse_env("MAAS_WS_CONNECT_TIMEOUT_MS", 10_000));
        let request_timeout = match parse_env("MAAS_WS_REQUEST_TIMEOUT_MS", 0_u64) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        let reconnect = ReconnectPolicy {
            enabled: parse_env_bool("MAAS_WS_RECONNECT", false),
            initial_delay: Duration::from_millis(parse_env("MAAS_WS_RECONNECT_DELAY_MS", 1000)),
            max_delay: Duration::from_millis(parse_env("MAAS_WS_RECONNECT_MAX_DELAY_MS", 30_000)),
            backoff_multiplier: 2.0,
            max_attempts: match parse_env("MAAS_WS_RECONNECT_MAX_ATTEMPTS", 0_u32) {
                0 => None,
                n => Some(n),
            },
        };

        let event_bus_capacity = parse_env("MAAS_WS_EVENT_BUS_CAPACITY", 256);

        Ok(Self {
            endpoint,
            connect_timeout,
            request_timeout,
            reconnect,
            event_bus_capacity,
        })
    }
}

/// Derives the websocket endpoint from a MAAS base URL.
///
/// `http://maas:5240/MAAS` + `ws` gives `ws://maas:5240/MAAS/ws`; `https`
/// maps to `wss`. `ws`/`wss` base URLs are kept as they are. A CSRF token,
/// when given, is appended as the `csrftoken` query parameter.
///
/// # Errors
///
/// Returns [`ClientError::Config`] if `base` does not parse or uses an
/// unsupported scheme.
pub fn build_endpoint(base: &str, path: &str, csrf_token: Option<&str>) -> Result<Url, ClientError> {
    let mut url = Url::parse(base)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ClientError::Config(format!(
                "unsupported scheme `{other}` in {base}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::Config(format!("cannot use scheme {scheme} for {base}")))?;

    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);

    if let Some(token) = csrf_token.filter(|t| !t.is_empty()) {
        url.query_pairs_mut().append_pair(CSRF_QUERY_PARAM, token);
    }
    Ok(url)
}

fn check_ws_scheme(url: &Url) -> Result<(), ClientError> {
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ClientError::Config(format!(
            "endpoint scheme must be ws or wss, got `{other}`"
        ))),
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .as_deref()
        .and_then(parse_bool)
        .unwrap_or(default)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}
