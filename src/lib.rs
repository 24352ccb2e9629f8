//! # smartstream-rs
//!
//! A Rust client for the Angel One SmartAPI WebSocket v2 live market feed.
//!
//! The crate covers the streaming session only: connecting with session
//! credentials, subscribing tokens per mode, decoding binary ticks, keeping
//! the socket alive and reconnecting after failures. Obtaining the access and
//! feed tokens (REST login) is up to the caller.
//!
//! ## Quick Start
//!
//! ```no_run
//! use smartstream_rs::credentials::Credentials;
//! use smartstream_rs::types::enums::{ExchangeType, SubscriptionMode};
//! use smartstream_rs::ws::subscription::TokenSet;
//! use smartstream_rs::FeedSession;
//!
//! #[tokio::main]
//! async fn main() -> smartstream_rs::Result<()> {
//!     let creds = Credentials::new("jwt-token", "api-key", "A123456", "feed-token")?;
//!     let session = FeedSession::builder(creds).build()?;
//!
//!     session.handlers().on_message(|msg| println!("{msg:?}"));
//!     session.connect().await?;
//!     session
//!         .subscribe(
//!             "ltp-watch",
//!             SubscriptionMode::Ltp,
//!             vec![TokenSet::new(ExchangeType::NSE_CM, ["5900"])],
//!         )
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod constants;
pub mod credentials;
pub mod error;
pub mod types;
pub mod ws;

/// Re-export the session type at crate root for convenience.
pub use ws::session::FeedSession;
/// Re-export the error type and Result alias.
pub use error::{Result, StreamError};
