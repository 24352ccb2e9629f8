//! WebSocket modules for the SmartAPI v2 live market feed.
//!
//! The feed lives at `wss://smartapisocket.angelone.in/smart-stream`. It
//! authenticates on the upgrade request, takes JSON control frames and pushes
//! **binary tick packets** in one of four modes:
//!
//! - **LTP** — last traded price (51 bytes)
//! - **Quote** — LTP + OHLC, volume and buy/sell totals (123 bytes)
//! - **Snap Quote** — Quote + open interest, best five levels, circuit
//!   limits and 52-week range (379 bytes)
//! - **Depth** — order-book tier, decoded up to the common prefix
//!
//! ## Modules
//!
//! - [`session`] — [`FeedSession`](session::FeedSession): connect, read loop,
//!   reconnects, subscribe/unsubscribe, close
//! - [`market_feed`] — pure binary decoder ([`parse_packet`](market_feed::parse_packet))
//! - [`subscription`] — token registry with quota and control-frame types
//! - [`heartbeat`] — `"ping"` probes and liveness timestamps
//! - [`events`] — callback slots and the dispatcher
//! - [`config`] — session configuration, retry policy and builder
//!
//! ## Limits
//!
//! - Up to 50 tokens per session across all modes
//! - DEPTH accepts NSE_CM tokens only

pub mod config;
pub mod events;
pub mod heartbeat;
pub mod market_feed;
pub mod session;
pub mod subscription;
mod tls;
