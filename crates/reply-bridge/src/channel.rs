//! # Selective Channel
//!
//! In-memory message buffer with FIFO and selective (predicate based)
//! consumption. Also the reference [`Transport`] used by the bridge.
//!
//! ## Selective Receive
//!
//! Predicates are arbitrary closures and cannot be keyed, so an insert cannot
//! tell which selective receiver it satisfies. `receive_selective` therefore
//! rescans the buffer every `polling_interval` until a match is found or the
//! timeout is used up. A matching message can sit in the buffer for up to one
//! polling interval before it is picked up.
//!
//! ```text
//! scan ─► no match ─► sleep(min(interval, time_left)) ─► scan ─► ...
//!                                                   └─► time_left == 0 ─► Timeout
//! ```

use crate::config::BridgeConfig;
use crate::{deadline_after, saturating_millis};
use async_trait::async_trait;
use bridge_types::{ChannelError, Message, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Message transport the synchronous producer and consumer talk through.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Endpoint name, used in logs and error messages.
    fn name(&self) -> &str;

    /// Transmit a message.
    async fn send(&self, message: Message) -> Result<(), TransportError>;

    /// Receive the next message, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// - `TransportError::Timeout` - nothing arrived in time
    async fn receive(&self, timeout: Duration) -> Result<Message, TransportError>;
}

/// Floor for the selective receive polling interval.
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_millis(1);

/// Named in-memory message buffer.
#[derive(Debug)]
pub struct SelectiveChannel {
    name: String,
    buffer: Mutex<VecDeque<Message>>,
    /// Unbounded when `None`
    capacity: Option<usize>,
    polling_interval: Duration,
    /// Wakes FIFO receivers on every send
    arrivals: Notify,
    messages_sent: AtomicU64,
}

impl SelectiveChannel {
    /// Create an unbounded channel with the default polling interval.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffer: Mutex::new(VecDeque::new()),
            capacity: None,
            polling_interval: BridgeConfig::DEFAULT_POLLING_INTERVAL,
            arrivals: Notify::new(),
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Create a channel holding at most `capacity` messages.
    #[must_use]
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new(name)
        }
    }

    /// Create a channel using the capacity and polling interval of `config`.
    #[must_use]
    pub fn from_config(name: impl Into<String>, config: &BridgeConfig) -> Self {
        Self {
            capacity: config.channel_capacity,
            ..Self::new(name)
        }
        .with_polling_interval(config.polling_interval)
    }

    /// Override the selective receive polling interval.
    ///
    /// Intervals below [`MIN_POLLING_INTERVAL`] are raised to it.
    #[must_use]
    pub fn with_polling_interval(mut self, polling_interval: Duration) -> Self {
        if polling_interval < MIN_POLLING_INTERVAL {
            warn!(
                channel = %self.name,
                requested_ms = saturating_millis(polling_interval),
                "Polling interval too small - using minimum"
            );
        }
        self.polling_interval = polling_interval.max(MIN_POLLING_INTERVAL);
        self
    }

    /// Channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of buffered messages, if bounded.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Selective receive rescan interval.
    #[must_use]
    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Returns true if no message is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Total messages accepted by `send`.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Append a message. Never blocks.
    ///
    /// # Errors
    ///
    /// - `ChannelError::BufferFull` - bounded channel at capacity
    pub fn send(&self, message: Message) -> Result<(), ChannelError> {
        {
            let mut buffer = self.buffer.lock();
            if let Some(capacity) = self.capacity {
                if buffer.len() >= capacity {
                    return Err(ChannelError::BufferFull {
                        channel: self.name.clone(),
                        capacity,
                    });
                }
            }
            trace!(channel = %self.name, message_id = %message.id(), "Buffering message");
            buffer.push_back(message);
        }

        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.arrivals.notify_waiters();
        Ok(())
    }

    /// Pop the oldest message, waiting up to `timeout` for one to arrive.
    ///
    /// # Errors
    ///
    /// - `ChannelError::Timeout` - nothing arrived in time
    pub async fn receive(&self, timeout: Duration) -> Result<Message, ChannelError> {
        let deadline = deadline_after(Instant::now(), timeout);

        loop {
            // Register interest before checking so a send between the check
            // and the await still wakes us
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.buffer.lock().pop_front() {
                return Ok(message);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self
                    .buffer
                    .lock()
                    .pop_front()
                    .ok_or_else(|| self.timeout_error(timeout));
            }
        }
    }

    /// Remove and return the first message matching `predicate`, rescanning
    /// every polling interval until `timeout` is used up.
    ///
    /// Non-matching messages keep their relative order. The last sleep is
    /// shortened so the total wait never exceeds `timeout`.
    ///
    /// # Errors
    ///
    /// - `ChannelError::Timeout` - no matching message arrived in time
    pub async fn receive_selective<P>(
        &self,
        predicate: P,
        timeout: Duration,
    ) -> Result<Message, ChannelError>
    where
        P: Fn(&Message) -> bool + Sync,
    {
        let mut time_left = timeout;
        let mut message = self.select(&predicate);

        while message.is_none() && !time_left.is_zero() {
            let pause = self.polling_interval.min(time_left);
            time_left = time_left.saturating_sub(pause);

            debug!(
                channel = %self.name,
                pause_ms = pause.as_millis(),
                "No matching message - retrying after polling interval"
            );
            tokio::time::sleep(pause).await;
            message = self.select(&predicate);
        }

        message.ok_or_else(|| self.timeout_error(timeout))
    }

    /// Remove every buffered message matching `predicate`.
    ///
    /// Returns the number of messages removed.
    pub fn purge<P>(&self, predicate: P) -> usize
    where
        P: Fn(&Message) -> bool,
    {
        let mut buffer = self.buffer.lock();
        let before = buffer.len();
        buffer.retain(|message| !predicate(message));
        let purged = before - buffer.len();

        if purged > 0 {
            debug!(channel = %self.name, purged = purged, "Purged messages from channel");
        }
        purged
    }

    /// Scan and remove under one lock so no message reaches two receivers.
    fn select<P>(&self, predicate: &P) -> Option<Message>
    where
        P: Fn(&Message) -> bool,
    {
        let mut buffer = self.buffer.lock();
        let position = buffer.iter().position(predicate)?;
        buffer.remove(position)
    }

    fn timeout_error(&self, timeout: Duration) -> ChannelError {
        ChannelError::Timeout {
            channel: self.name.clone(),
            timeout_ms: saturating_millis(timeout),
        }
    }
}

#[async_trait]
impl Transport for SelectiveChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        SelectiveChannel::send(self, message).map_err(TransportError::from)
    }

    async fn receive(&self, timeout: Duration) -> Result<Message, TransportError> {
        SelectiveChannel::receive(self, timeout)
            .await
            .map_err(TransportError::from)
    }
}
