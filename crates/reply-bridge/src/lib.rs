//! # Reply Bridge
//!
//! Turns asynchronous message exchange into synchronous request/reply calls.
//! A caller sends a request, keeps working, and later blocks (with a bounded
//! timeout) until the reply correlated with that request arrives.
//!
//! ## Components
//!
//! ```text
//!  SyncProducer                                         SyncConsumer
//! ┌────────────┐   send(request)   ┌──────────────┐   receive()   ┌────────────┐
//! │ correlator │ ────────────────► │  Transport   │ ────────────► │ correlator │
//! │   store    │                   └──────────────┘               │ reply chans│
//! │            │ ◄── store(key, reply) ── reply channel ◄─ send ──│            │
//! └────────────┘                   (ChannelRegistry)              └────────────┘
//!       │ find(key, timeout)
//!       ▼
//!  receive(ctx, timeout) → reply | ReplyTimeout
//! ```
//!
//! - [`CorrelationStore`]: key → value hand-off with bounded waits
//! - [`SelectiveChannel`]: FIFO and predicate-based consumption
//! - [`SyncProducer`] / [`SyncConsumer`]: client and server sides of a call
//! - [`EventFuture`]: first-writer-wins single slot
//!
//! ## Guarantees
//!
//! - **At-most-once:** a stored value is returned to at most one poller
//! - **No lost wake-up:** a store racing a poller's deadline is never lost
//! - **Bounded waits:** every blocking call takes an explicit timeout

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod channel;
pub mod config;
pub mod correlation_store;
pub mod correlator;
pub mod event_future;
pub mod registry;
pub mod selector;
pub mod sync_consumer;
pub mod sync_producer;

// Re-export main types
pub use channel::{SelectiveChannel, Transport};
pub use config::{BridgeConfig, ConfigError, DuplicatePolicy, LateArrivalPolicy};
pub use correlation_store::{cleanup_task, CorrelationStore, StoreOutcome, StoreStats};
pub use correlator::{HeaderCorrelator, MessageCorrelator};
pub use event_future::EventFuture;
pub use registry::ChannelRegistry;
pub use selector::{HeaderSelector, SelectorError};
pub use sync_consumer::SyncConsumer;
pub use sync_producer::SyncProducer;

/// Call context variable prefix under which a producer saves the reply
/// channel of a call, followed by the endpoint key name.
pub const REPLY_CHANNEL_VARIABLE_PREFIX: &str = "bridge_reply_to_";

/// Roughly 30 years, used in place of deadlines that overflow `Instant`.
const FAR_FUTURE: std::time::Duration = std::time::Duration::from_secs(86_400 * 365 * 30);

/// `start + timeout`, saturating to a far-future deadline on overflow so
/// `Duration::MAX` means "wait forever".
pub(crate) fn deadline_after(
    start: tokio::time::Instant,
    timeout: std::time::Duration,
) -> tokio::time::Instant {
    start
        .checked_add(timeout)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// Whole milliseconds of `duration`, saturating at `u64::MAX`.
pub(crate) fn saturating_millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
