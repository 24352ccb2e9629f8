#![allow(missing_docs)]
//! Session configuration and builder.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use smartstream_rs::credentials::Credentials;
//! use smartstream_rs::ws::config::{RetryPolicy, RetryStrategy};
//! use smartstream_rs::FeedSession;
//!
//! # fn main() -> smartstream_rs::Result<()> {
//! let creds = Credentials::new("jwt", "api-key", "A123456", "feed-token")?;
//! let session = FeedSession::builder(creds)
//!     .heartbeat_interval(Duration::from_secs(10))
//!     .retry(RetryPolicy {
//!         max_attempts: 5,
//!         strategy: RetryStrategy::Exponential,
//!         ..RetryPolicy::default()
//!     })
//!     .deliver_raw_frames(true)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use url::Url;

use crate::constants::{WS_SMART_STREAM_URL, defaults};
use crate::credentials::Credentials;
use crate::error::{Result, StreamError};
use crate::ws::session::FeedSession;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// How the delay between reconnect attempts evolves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Every attempt waits `delay`.
    #[default]
    Constant,
    /// Attempt `n` waits `delay * multiplier^(n-1)`.
    Exponential,
}

/// Bounded reconnect policy.
///
/// The session makes at most `max_attempts` consecutive reconnect attempts.
/// The counter resets once a reconnected socket delivers its first frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before the session gives up. `0` disables reconnects.
    pub max_attempts: u32,
    /// Base wait before each attempt.
    pub delay: Duration,
    /// No single wait exceeds this.
    pub duration_ceiling: Duration,
    /// Growth factor, applied only under [`RetryStrategy::Exponential`].
    pub multiplier: u32,
    pub strategy: RetryStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_RETRY_ATTEMPTS,
            delay: Duration::from_secs(defaults::RETRY_DELAY_SECS),
            duration_ceiling: Duration::from_secs(defaults::RETRY_DURATION_SECS),
            multiplier: defaults::RETRY_MULTIPLIER,
            strategy: RetryStrategy::Constant,
        }
    }
}

impl RetryPolicy {
    /// Wait before the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let wait = match self.strategy {
            RetryStrategy::Constant => self.delay,
            RetryStrategy::Exponential => {
                let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor)
            }
        };
        wait.min(self.duration_ceiling)
    }
}

// ---------------------------------------------------------------------------
// Dispatch mode
// ---------------------------------------------------------------------------

/// How callbacks are run relative to each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// One consumer thread, events delivered in order.
    #[default]
    Ordered,
    /// Each event on the blocking pool, no ordering guarantee.
    Concurrent,
}

// ---------------------------------------------------------------------------
// Session config
// ---------------------------------------------------------------------------

/// Configuration for a [`FeedSession`].
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub endpoint: String,
    /// Interval between `"ping"` probes.
    pub heartbeat_interval: Duration,
    /// Maximum tokens held across all modes.
    pub quota: usize,
    pub retry: RetryPolicy,
    pub dispatch: DispatchMode,
    /// Replay the registry after every successful reconnect.
    pub resubscribe_on_reconnect: bool,
    /// Also deliver each binary frame undecoded.
    pub deliver_raw_frames: bool,
    /// Skip TLS certificate verification. Never enable against production.
    pub accept_invalid_certs: bool,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    /// How long `close()` waits for background tasks.
    pub shutdown_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: WS_SMART_STREAM_URL.to_owned(),
            heartbeat_interval: Duration::from_secs(defaults::HEARTBEAT_INTERVAL_SECS),
            quota: defaults::QUOTA_LIMIT,
            retry: RetryPolicy::default(),
            dispatch: DispatchMode::default(),
            resubscribe_on_reconnect: true,
            deliver_raw_frames: false,
            accept_invalid_certs: false,
            connect_timeout: Duration::from_secs(defaults::CONNECT_TIMEOUT_SECS),
            write_timeout: Duration::from_secs(defaults::WRITE_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(defaults::SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

impl FeedConfig {
    /// Check the configuration for values the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(StreamError::InvalidArgument(format!(
                "endpoint scheme must be ws or wss, got {}",
                url.scheme()
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(StreamError::InvalidArgument(
                "heartbeat interval must be non-zero".into(),
            ));
        }
        if self.quota == 0 {
            return Err(StreamError::InvalidArgument("quota must be at least 1".into()));
        }
        if self.retry.multiplier == 0 {
            return Err(StreamError::InvalidArgument(
                "retry multiplier must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("connect timeout", self.connect_timeout),
            ("write timeout", self.write_timeout),
        ] {
            if value.is_zero() {
                return Err(StreamError::InvalidArgument(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`FeedSession`] with custom configuration.
pub struct FeedSessionBuilder {
    credentials: Credentials,
    config: FeedConfig,
}

impl FeedSessionBuilder {
    /// Create a builder with default configuration.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            config: FeedConfig::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: FeedConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the endpoint. Default: the SmartAPI v2 stream.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Set the probe interval. Default: 10 s.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Set the token quota. Default: 50.
    pub fn quota(mut self, quota: usize) -> Self {
        self.config.quota = quota;
        self
    }

    /// Set the reconnect policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the callback dispatch mode. Default: ordered.
    pub fn dispatch(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch = mode;
        self
    }

    /// Replay subscriptions after a reconnect. Default: true.
    pub fn resubscribe_on_reconnect(mut self, enable: bool) -> Self {
        self.config.resubscribe_on_reconnect = enable;
        self
    }

    /// Deliver raw binary frames alongside decoded ticks. Default: false.
    pub fn deliver_raw_frames(mut self, enable: bool) -> Self {
        self.config.deliver_raw_frames = enable;
        self
    }

    /// Disable TLS certificate verification. Default: false.
    pub fn accept_invalid_certs(mut self, enable: bool) -> Self {
        self.config.accept_invalid_certs = enable;
        self
    }

    /// Set the handshake timeout. Default: 10 s.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the per-frame write timeout. Default: 5 s.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    /// Set how long `close()` waits for background tasks. Default: 5 s.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Validate the configuration and build the session.
    pub fn build(self) -> Result<FeedSession> {
        FeedSession::new(self.credentials, self.config)
    }
}
