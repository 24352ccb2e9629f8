//! Constants for the SmartAPI WebSocket v2 market feed.
//!
//! Contains the stream endpoint, authentication header names, protocol
//! payloads, and the default limits and timings used by
//! [`FeedSession`](crate::ws::session::FeedSession). They are exported for
//! advanced usage and tests.

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// WebSocket endpoint for the SmartAPI v2 live market feed (binary).
pub const WS_SMART_STREAM_URL: &str = "wss://smartapisocket.angelone.in/smart-stream";

// ---------------------------------------------------------------------------
// Authentication headers
// ---------------------------------------------------------------------------

/// Header names sent on the WebSocket upgrade request.
pub mod headers {
    /// Carries the session access token.
    pub const AUTHORIZATION: &str = "authorization";
    /// Carries the SmartAPI key.
    pub const API_KEY: &str = "x-api-key";
    /// Carries the client code.
    pub const CLIENT_CODE: &str = "x-client-code";
    /// Carries the feed token.
    pub const FEED_TOKEN: &str = "x-feed-token";
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// Text payload of the liveness probe.
pub const HEARTBEAT_MESSAGE: &str = "ping";

/// Text payload the feed answers a liveness probe with.
pub const HEARTBEAT_REPLY: &str = "pong";

/// Correlation id attached to subscribe frames replayed after a reconnect.
pub const RESUBSCRIBE_CORRELATION_ID: &str = "resubscribe";

/// Binary packet sizes per subscription tier.
pub mod packet {
    /// Common prefix shared by every tier (mode .. last traded price).
    pub const MIN_LEN: usize = 51;
    /// LTP packets carry only the common prefix.
    pub const LTP_LEN: usize = MIN_LEN;
    /// QUOTE packets end after the close price.
    pub const QUOTE_LEN: usize = 123;
    /// SNAP_QUOTE packets end after the 52-week low.
    pub const SNAP_QUOTE_LEN: usize = 379;
    /// DEPTH packets are decoded up to the common prefix.
    pub const DEPTH_LEN: usize = MIN_LEN;
    /// Price fields are transmitted in paise.
    pub const PRICE_SCALE: f64 = 100.0;
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default limits and timings.
pub mod defaults {
    /// Maximum concurrently subscribed tokens per session.
    pub const QUOTA_LIMIT: usize = 50;
    /// Seconds between liveness probes.
    pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;
    /// Reconnect attempts before giving up.
    pub const MAX_RETRY_ATTEMPTS: u32 = 100;
    /// Seconds to wait before each reconnect attempt.
    pub const RETRY_DELAY_SECS: u64 = 10;
    /// Growth factor for exponential retry delays.
    pub const RETRY_MULTIPLIER: u32 = 2;
    /// Upper bound for a single retry delay, in seconds.
    pub const RETRY_DURATION_SECS: u64 = 60;
    /// Seconds allowed for the WebSocket handshake.
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
    /// Seconds allowed for a single frame write.
    pub const WRITE_TIMEOUT_SECS: u64 = 5;
    /// Seconds `close()` waits for background tasks before aborting them.
    pub const SHUTDOWN_TIMEOUT_SECS: u64 = 5;
}
