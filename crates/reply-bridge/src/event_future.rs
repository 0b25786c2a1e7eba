//! # Single-Slot Event Future
//!
//! Captures the first of several competing signals (a value, an error, or an
//! explicit close) and hands it out to every caller of [`EventFuture::get`],
//! including callers that arrive long after it was set. Later writes are
//! ignored and logged at debug level.

use bridge_types::BridgeError;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

#[derive(Debug, Clone)]
enum Outcome<T> {
    Value(T),
    Failed(String),
    Closed,
}

struct Inner<T> {
    name: String,
    slot: OnceCell<Outcome<T>>,
    completed: Notify,
}

/// First-writer-wins slot with a bounded `get`.
///
/// Cloning shares the slot.
pub struct EventFuture<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for EventFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> EventFuture<T> {
    /// Create an empty slot; `name` appears in logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                slot: OnceCell::new(),
                completed: Notify::new(),
            }),
        }
    }

    /// Complete with a value. Returns false if already completed.
    pub fn try_set(&self, value: T) -> bool {
        self.complete(Outcome::Value(value), "value")
    }

    /// Complete with a failure. Returns false if already completed.
    pub fn try_set_error(&self, error: impl Into<String>) -> bool {
        self.complete(Outcome::Failed(error.into()), "error")
    }

    /// Complete without a value. Returns false if already completed.
    pub fn try_close(&self) -> bool {
        self.complete(Outcome::Closed, "close")
    }

    /// Returns true once any writer completed the slot.
    pub fn is_completed(&self) -> bool {
        self.inner.slot.initialized()
    }

    /// Result if completed, without waiting.
    pub fn try_get(&self) -> Option<Result<T, BridgeError>> {
        self.inner.slot.get().map(|outcome| self.resolve(outcome))
    }

    /// Wait up to `timeout` for the slot to be completed.
    ///
    /// Once completed, every call returns the same result immediately.
    ///
    /// # Errors
    ///
    /// - `BridgeError::AwaitTimeout` - still empty at the deadline
    /// - `BridgeError::EventFailed` - completed with an error or closed
    pub async fn get(&self, timeout: Duration) -> Result<T, BridgeError> {
        let deadline = crate::deadline_after(Instant::now(), timeout);

        loop {
            let notified = self.inner.completed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.inner.slot.get() {
                return self.resolve(outcome);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return match self.inner.slot.get() {
                    Some(outcome) => self.resolve(outcome),
                    None => Err(BridgeError::AwaitTimeout {
                        timeout_ms: crate::saturating_millis(timeout),
                    }),
                };
            }
        }
    }

    /// Complete the slot from the first item of `stream`: `Ok` sets the
    /// value, `Err` sets the error, and an empty stream closes the slot.
    pub fn watch<S, E>(&self, stream: S) -> JoinHandle<()>
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let future = self.clone();

        tokio::spawn(async move {
            tokio::pin!(stream);
            match stream.next().await {
                Some(Ok(value)) => {
                    future.try_set(value);
                }
                Some(Err(err)) => {
                    future.try_set_error(err.to_string());
                }
                None => {
                    future.try_close();
                }
            }
        })
    }

    fn complete(&self, outcome: Outcome<T>, kind: &str) -> bool {
        match self.inner.slot.set(outcome) {
            Ok(()) => {
                self.inner.completed.notify_waiters();
                true
            }
            Err(_) => {
                debug!(event = %self.inner.name, kind = kind, "Ignoring event - slot already completed");
                false
            }
        }
    }

    fn resolve(&self, outcome: &Outcome<T>) -> Result<T, BridgeError> {
        match outcome {
            Outcome::Value(value) => Ok(value.clone()),
            Outcome::Failed(err) => Err(BridgeError::EventFailed(err.clone())),
            Outcome::Closed => Err(BridgeError::EventFailed(format!(
                "'{}' closed before an event was received",
                self.inner.name
            ))),
        }
    }
}
