#![allow(missing_docs)]
//! Caller callbacks and the dispatcher that invokes them.
//!
//! [`EventHandlers`] holds one slot per event kind. Registering a handler
//! replaces whatever was in the slot, and firing an empty slot does nothing.
//!
//! The read loop never calls a handler directly. It hands each event to the
//! [`Dispatcher`], which runs handlers off the I/O path so a slow consumer
//! cannot stall ingestion:
//!
//! - [`DispatchMode::Ordered`] feeds an unbounded queue drained by one
//!   dedicated thread. Handlers see events in the order the session produced
//!   them, one at a time.
//! - [`DispatchMode::Concurrent`] runs each event on Tokio's blocking pool.
//!   Handlers may run in parallel and out of order.
//!
//! A panicking handler is logged and the dispatcher keeps going.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Result, StreamError};
use crate::ws::config::DispatchMode;
use crate::ws::market_feed::ParsedTick;

/// Name of the ordered-dispatch consumer thread.
const DISPATCH_THREAD_NAME: &str = "smartstream-dispatch";

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// An inbound message delivered to the on-message handler.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// A decoded binary tick.
    Tick(ParsedTick),
    /// The undecoded binary frame. Only sent when raw delivery is enabled.
    Raw(Bytes),
    /// A text frame other than the heartbeat reply.
    Text(String),
}

/// Everything the session reports to the caller.
#[derive(Debug)]
pub enum SessionEvent {
    Connect,
    Message(FeedMessage),
    Close,
    Error(StreamError),
    /// A reconnect succeeded on the given attempt.
    Reconnect(u32),
    /// Retries are exhausted; the session stays disconnected.
    NoReconnect,
}

// ---------------------------------------------------------------------------
// Handler slots
// ---------------------------------------------------------------------------

type Slot<F> = RwLock<Option<Arc<F>>>;

/// Single-slot callback registry.
///
/// Handlers run on the dispatcher, never on the read loop, so they may block.
#[derive(Default)]
pub struct EventHandlers {
    connect: Slot<dyn Fn() + Send + Sync>,
    message: Slot<dyn Fn(FeedMessage) + Send + Sync>,
    close: Slot<dyn Fn() + Send + Sync>,
    error: Slot<dyn Fn(StreamError) + Send + Sync>,
    reconnect: Slot<dyn Fn(u32) + Send + Sync>,
    no_reconnect: Slot<dyn Fn() + Send + Sync>,
}

fn store<F: ?Sized>(slot: &Slot<F>, handler: Arc<F>) {
    *slot.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
}

fn load<F: ?Sized>(slot: &Slot<F>) -> Option<Arc<F>> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

impl EventHandlers {
    /// Called after every successful connect, including reconnects.
    pub fn on_connect(&self, f: impl Fn() + Send + Sync + 'static) {
        store(&self.connect, Arc::new(f));
    }

    /// Called for every inbound tick, raw frame or text frame.
    pub fn on_message(&self, f: impl Fn(FeedMessage) + Send + Sync + 'static) {
        store(&self.message, Arc::new(f));
    }

    /// Called once when the caller closes the session.
    pub fn on_close(&self, f: impl Fn() + Send + Sync + 'static) {
        store(&self.close, Arc::new(f));
    }

    /// Called for failures raised by background work.
    pub fn on_error(&self, f: impl Fn(StreamError) + Send + Sync + 'static) {
        store(&self.error, Arc::new(f));
    }

    /// Called with the attempt number after a successful reconnect.
    pub fn on_reconnect(&self, f: impl Fn(u32) + Send + Sync + 'static) {
        store(&self.reconnect, Arc::new(f));
    }

    /// Called once when the retry policy gives up.
    pub fn on_no_reconnect(&self, f: impl Fn() + Send + Sync + 'static) {
        store(&self.no_reconnect, Arc::new(f));
    }

    fn invoke(&self, event: SessionEvent) {
        match event {
            SessionEvent::Connect => {
                if let Some(f) = load(&self.connect) {
                    f();
                }
            }
            SessionEvent::Message(msg) => {
                if let Some(f) = load(&self.message) {
                    f(msg);
                }
            }
            SessionEvent::Close => {
                if let Some(f) = load(&self.close) {
                    f();
                }
            }
            SessionEvent::Error(err) => match load(&self.error) {
                Some(f) => f(err),
                None => tracing::debug!(error = %err, "No error handler registered"),
            },
            SessionEvent::Reconnect(attempt) => {
                if let Some(f) = load(&self.reconnect) {
                    f(attempt);
                }
            }
            SessionEvent::NoReconnect => {
                if let Some(f) = load(&self.no_reconnect) {
                    f();
                }
            }
        }
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("connect", &load(&self.connect).is_some())
            .field("message", &load(&self.message).is_some())
            .field("close", &load(&self.close).is_some())
            .field("error", &load(&self.error).is_some())
            .field("reconnect", &load(&self.reconnect).is_some())
            .field("no_reconnect", &load(&self.no_reconnect).is_some())
            .finish()
    }
}

fn deliver(handlers: &EventHandlers, event: SessionEvent) {
    if catch_unwind(AssertUnwindSafe(|| handlers.invoke(event))).is_err() {
        tracing::error!("Event handler panicked");
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Runs [`EventHandlers`] off the I/O path.
#[derive(Debug)]
pub struct Dispatcher {
    handlers: Arc<EventHandlers>,
    queue: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl Dispatcher {
    /// Create a dispatcher. [`DispatchMode::Ordered`] starts the consumer
    /// thread here; it exits when the dispatcher is dropped.
    pub fn new(handlers: Arc<EventHandlers>, mode: DispatchMode) -> Result<Self> {
        let queue = match mode {
            DispatchMode::Ordered => {
                let (tx, mut rx) = mpsc::unbounded_channel::<SessionEvent>();
                let consumer = handlers.clone();
                std::thread::Builder::new()
                    .name(DISPATCH_THREAD_NAME.into())
                    .spawn(move || {
                        while let Some(event) = rx.blocking_recv() {
                            deliver(&consumer, event);
                        }
                    })
                    .map_err(StreamError::Io)?;
                Some(tx)
            }
            DispatchMode::Concurrent => None,
        };

        Ok(Self { handlers, queue })
    }

    /// The handler slots this dispatcher invokes.
    pub fn handlers(&self) -> &Arc<EventHandlers> {
        &self.handlers
    }

    /// Hand `event` to the handlers without waiting for them to run.
    pub fn emit(&self, event: SessionEvent) {
        match &self.queue {
            Some(tx) => {
                if let Err(mpsc::error::SendError(event)) = tx.send(event) {
                    tracing::warn!(?event, "Dispatch thread gone, dropping event");
                }
            }
            None => match tokio::runtime::Handle::try_current() {
                Ok(rt) => {
                    let handlers = self.handlers.clone();
                    rt.spawn_blocking(move || deliver(&handlers, event));
                }
                Err(_) => deliver(&self.handlers, event),
            },
        }
    }
}
