//! Binary to connect to the SmartAPI v2 market feed and subscribe to
//! SBIN (NSE_CM:3045) and an index future token for inspecting live data.
//!
//! # Usage
//!
//! ```sh
//! export SMARTAPI_ACCESS_TOKEN="your-jwt"
//! export SMARTAPI_API_KEY="your-api-key"
//! export SMARTAPI_CLIENT_CODE="your-client-code"
//! export SMARTAPI_FEED_TOKEN="your-feed-token"
//! cargo run --bin ws_check --features cli
//! ```

use std::time::Duration;

use smartstream_rs::FeedSession;
use smartstream_rs::credentials::Credentials;
use smartstream_rs::types::enums::{ExchangeType, SubscriptionMode};
use smartstream_rs::ws::config::RetryPolicy;
use smartstream_rs::ws::events::FeedMessage;
use smartstream_rs::ws::subscription::TokenSet;
use tokio::time;

#[tokio::main]
async fn main() -> smartstream_rs::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let creds = Credentials::from_env()?;
    let session = FeedSession::builder(creds)
        .retry(RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_secs(2),
            ..RetryPolicy::default()
        })
        .build()?;

    session.handlers().on_connect(|| println!("Connected"));
    session.handlers().on_message(|msg| match msg {
        FeedMessage::Tick(tick) => println!("{tick:#?}"),
        FeedMessage::Text(text) => println!("text: {text}"),
        FeedMessage::Raw(frame) => println!("raw frame: {} bytes", frame.len()),
    });
    session.handlers().on_error(|e| eprintln!("Error: {e}"));
    session.handlers().on_reconnect(|n| println!("Reconnected on attempt {n}"));
    session.handlers().on_no_reconnect(|| eprintln!("Gave up reconnecting"));

    println!("Connecting to SmartAPI market feed…");
    session.connect().await?;

    println!("Subscribing to NSE_CM:3045 SBIN (Snap Quote)…");
    session
        .subscribe(
            "ws-check-snap",
            SubscriptionMode::SnapQuote,
            vec![TokenSet::new(ExchangeType::NSE_CM, ["3045"])],
        )
        .await?;

    println!("Subscribing to NSE_FO:35003 (LTP)…");
    session
        .subscribe(
            "ws-check-ltp",
            SubscriptionMode::Ltp,
            vec![TokenSet::new(ExchangeType::NSE_FO, ["35003"])],
        )
        .await?;

    println!("Listening for events for 10 seconds…");
    println!("(Note: data only arrives during market hours 9:15–15:30 IST)\n");
    time::sleep(Duration::from_secs(10)).await;

    println!(
        "\nlast ping: {:?}, last pong: {:?}",
        session.last_ping(),
        session.last_pong()
    );
    println!("10 seconds elapsed — disconnecting…");
    session.close().await?;
    println!("Done.");

    Ok(())
}
