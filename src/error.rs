//! Error types for the `smartstream-rs` crate.
//!
//! All fallible operations in this crate return [`Result<T>`], which is an
//! alias for `std::result::Result<T, StreamError>`.
//!
//! [`StreamError`] covers:
//! - **Connection errors** — Handshake failures and connect timeouts
//! - **Read errors** — The live socket failed; the reconnect policy takes over
//! - **Packet errors** — A binary frame could not be decoded (non-fatal)
//! - **Subscription errors** — Quota breaches and invalid exchange types
//! - **Serialization errors** — A control frame could not be encoded
//! - **Write errors** — Transport failures and timeouts on the send path
//! - **I/O errors** — The callback dispatch thread could not be spawned
//! - **URL errors** — Malformed endpoint configuration
//! - **Invalid arguments** — Client-side validation errors
//!
//! Errors raised by background tasks (read loop, heartbeat, reconnects) are
//! never returned to a caller; they are delivered through the session's
//! on-error callback instead.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// All possible errors produced by the streaming client.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The WebSocket handshake with the feed failed.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// The WebSocket handshake did not complete in time.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The live connection failed while reading. Triggers the reconnect policy.
    #[error("read failure: {0}")]
    ReadFailure(String),

    /// A binary frame was too short or carried an unknown subscription mode.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// A subscribe request would push the registry past its token quota.
    #[error(
        "quota exceeded: {subscribed} subscribed + {requested} requested exceeds the limit of {limit} tokens"
    )]
    QuotaExceeded {
        /// The configured quota.
        limit: usize,
        /// Tokens already held by the registry.
        subscribed: usize,
        /// Tokens carried by the rejected request.
        requested: usize,
    },

    /// DEPTH subscriptions accept a single NSE_CM token set only.
    #[error("invalid exchange type: depth mode supports exactly one token set on NSE_CM")]
    InvalidExchangeType,

    /// A subscribe/unsubscribe request could not be serialized.
    #[error("failed to serialize request: {0}")]
    MarshalFailure(#[from] serde_json::Error),

    /// A WebSocket-level error on the write path.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// A frame could not be written within the configured write timeout.
    #[error("send timed out after {0:?}")]
    SendTimeout(Duration),

    /// The operation needs a live connection and there is none.
    #[error("not connected")]
    NotConnected,

    /// The callback dispatch thread could not be started.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error building or parsing the endpoint URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StreamError>;
