//! Heartbeat monitor and liveness timestamps.
//!
//! While a connection is live the monitor sends the text probe `"ping"` on a
//! fixed interval. It keeps the connection active and does nothing else. A
//! missing `"pong"` never closes the connection. Dead connections are
//! detected by the read loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::Result;

/// Last-seen timestamps for probe traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Liveness {
    last_ping: Option<DateTime<Utc>>,
    last_pong: Option<DateTime<Utc>>,
}

impl Liveness {
    /// Record a ping (sent by us, or received from the peer).
    pub fn record_ping(&mut self, at: DateTime<Utc>) {
        self.last_ping = Some(at);
    }

    /// Record a pong received from the peer.
    pub fn record_pong(&mut self, at: DateTime<Utc>) {
        self.last_pong = Some(at);
    }

    pub fn last_ping(&self) -> Option<DateTime<Utc>> {
        self.last_ping
    }

    pub fn last_pong(&self) -> Option<DateTime<Utc>> {
        self.last_pong
    }
}

/// The connection a heartbeat runs against.
pub(crate) trait HeartbeatTarget: Send + Sync + 'static {
    /// `false` once the connection identified by `generation` is gone.
    fn is_live(&self, generation: u64) -> bool;

    /// Write one probe frame.
    fn send_probe(&self) -> impl Future<Output = Result<()>> + Send;

    /// Resolves once the session is closed by its owner.
    fn closed(&self) -> impl Future<Output = ()> + Send;
}

/// Probe `target` every `period` until `generation` stops being live.
///
/// The first probe goes out one full period after start. Once the target
/// reports the generation as gone, or is closed, the loop returns for good;
/// a fresh connect starts a new monitor.
pub(crate) async fn run<T: HeartbeatTarget>(target: Arc<T>, period: Duration, generation: u64) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = target.closed() => {
                tracing::debug!(generation, "Heartbeat stopped by close");
                return;
            }
        }

        if !target.is_live(generation) {
            tracing::debug!(generation, "Heartbeat stopped");
            return;
        }

        if let Err(e) = target.send_probe().await {
            tracing::warn!(generation, error = %e, "Heartbeat probe failed");
        }
    }
}
