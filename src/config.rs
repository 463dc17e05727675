//! Client configuration.

use std::time::Duration;

use url::Url;

use crate::error::{PokerError, Result};

/// Delay before the next fetch after a failed poll.
pub const DEFAULT_POLL_BACKOFF: Duration = Duration::from_secs(1);

/// Delay between channel reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// The server evicts participants it has not heard from in 10 seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Must exceed the server's 5 second long-poll hold.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);
const MIN_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Configuration shared by the channel manager, the HTTP API and the mirrors.
///
/// Only `base_url` is required; every other field has a default.
///
/// # Example
///
/// ```
/// use planning_poker_client::config::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new("https://poker.example/api/v1")
///     .with_poll_backoff(Duration::from_secs(2));
/// assert_eq!(config.poll_backoff, Duration::from_secs(2));
/// assert_eq!(config.channel_url().unwrap().as_str(), "wss://poker.example/ws");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Root of the HTTP API, e.g. `https://host/api/v1`.
    pub base_url: String,
    /// Push channel endpoint. Derived from `base_url` when unset.
    pub channel_url: Option<String>,
    /// Delay before retrying after a failed fetch.
    ///
    /// Defaults to **1 second**. Values below 10 ms are clamped.
    pub poll_backoff: Duration,
    /// Extra delay before the next fetch after a successful poll.
    ///
    /// Defaults to zero: with long-polling the server paces the loop.
    pub poll_interval: Duration,
    /// Delay between channel reconnection attempts.
    ///
    /// Defaults to **1 second**. Values below 10 ms are clamped.
    pub reconnect_delay: Duration,
    /// Pass the last seen change id so the server holds the request until
    /// something changes. When `false` every fetch returns immediately.
    pub long_poll: bool,
    /// Presence ping cadence in poll mode. `None` disables pings.
    pub heartbeat_interval: Option<Duration>,
    /// Timeout for a single HTTP request and for channel request/reply pairs.
    pub request_timeout: Duration,
    /// Capacity of each mirror's bounded event channel (clamped to at least 1).
    pub event_channel_capacity: usize,
    /// Time the channel loop is given to close the transport on disconnect.
    pub shutdown_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            channel_url: None,
            poll_backoff: DEFAULT_POLL_BACKOFF,
            poll_interval: Duration::ZERO,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            long_poll: true,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Build a configuration from `POKER_*` environment variables.
    ///
    /// `POKER_BASE_URL` is required. `POKER_CHANNEL_URL`,
    /// `POKER_POLL_BACKOFF_MS` and `POKER_RECONNECT_DELAY_MS` are optional.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("POKER_BASE_URL").map_err(|_| PokerError::InvalidEnvVar {
            var: "POKER_BASE_URL",
        })?;
        let mut config = Self::new(base_url);

        if let Ok(channel_url) = std::env::var("POKER_CHANNEL_URL") {
            config = config.with_channel_url(channel_url);
        }
        if let Some(backoff) = millis_from_env("POKER_POLL_BACKOFF_MS")? {
            config = config.with_poll_backoff(backoff);
        }
        if let Some(delay) = millis_from_env("POKER_RECONNECT_DELAY_MS")? {
            config = config.with_reconnect_delay(delay);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_channel_url(mut self, channel_url: impl Into<String>) -> Self {
        self.channel_url = Some(channel_url.into());
        self
    }

    #[must_use]
    pub fn with_poll_backoff(mut self, backoff: Duration) -> Self {
        self.poll_backoff = backoff.max(MIN_RETRY_DELAY);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay.max(MIN_RETRY_DELAY);
        self
    }

    #[must_use]
    pub fn with_long_poll(mut self, long_poll: bool) -> Self {
        self.long_poll = long_poll;
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// The push channel endpoint.
    ///
    /// An explicit `channel_url` wins. Otherwise the scheme of `base_url` is
    /// switched to `ws`/`wss` and the path replaced with `/ws`.
    pub fn channel_url(&self) -> Result<Url> {
        if let Some(explicit) = &self.channel_url {
            return Url::parse(explicit).map_err(|e| PokerError::InvalidUrl(e.to_string()));
        }

        let mut url =
            Url::parse(&self.base_url).map_err(|e| PokerError::InvalidUrl(e.to_string()))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => return Err(PokerError::InvalidUrl(format!("unsupported scheme {other}"))),
        };
        url.set_scheme(scheme)
            .map_err(|()| PokerError::InvalidUrl(self.base_url.clone()))?;
        url.set_path("/ws");
        url.set_query(None);
        Ok(url)
    }
}

fn millis_from_env(var: &'static str) -> Result<Option<Duration>> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| PokerError::InvalidEnvVar { var }),
        Err(_) => Ok(None),
    }
}
