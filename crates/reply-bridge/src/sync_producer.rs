//! # Synchronous Producer
//!
//! Client side of a synchronous exchange: sends a request and later waits for
//! the reply correlated with it.
//!
//! ## Flow
//!
//! ```text
//! send(request, ctx)                          receive(ctx, timeout)
//!   │ key = correlator.key(request)             │ key = store.get_key(ctx)
//!   │ store.save_key(key_name, key, ctx)        │ store.find(key, timeout)
//!   │ reply channel ← bridge_reply_to           │   ├─ Some(reply) → REPLIED
//!   │   (temporary channel if absent)           │   └─ None        → TIMED_OUT
//!   │ transport.send(request)                   │
//!   └ spawn listener: reply channel ──store(key, reply)──► store
//! ```
//!
//! Replies may also be stored from outside through [`SyncProducer::on_reply`]
//! or directly on [`SyncProducer::store`].

use crate::channel::{SelectiveChannel, Transport};
use crate::config::BridgeConfig;
use crate::correlation_store::{CorrelationStore, StoreOutcome};
use crate::correlator::{HeaderCorrelator, MessageCorrelator};
use crate::registry::ChannelRegistry;
use crate::REPLY_CHANNEL_VARIABLE_PREFIX;
use bridge_types::{BridgeError, CallContext, CallState, Message};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};

/// Background receive on a reply channel for one outstanding call.
struct ReplyListener {
    abort: AbortHandle,
    channel: String,
    temporary: bool,
}

/// Sends requests and correlates their replies.
pub struct SyncProducer {
    name: String,
    transport: Arc<dyn Transport>,
    registry: Arc<ChannelRegistry>,
    correlator: Arc<dyn MessageCorrelator>,
    store: Arc<CorrelationStore<Message>>,
    listeners: Arc<DashMap<String, ReplyListener>>,
    config: BridgeConfig,
}

impl SyncProducer {
    /// Create a producer correlating on the configured header.
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        registry: Arc<ChannelRegistry>,
        config: BridgeConfig,
    ) -> Self {
        let name = name.into();
        Self {
            store: Arc::new(CorrelationStore::new(name.clone(), &config)),
            correlator: Arc::new(HeaderCorrelator::from_config(&config)),
            name,
            transport,
            registry,
            listeners: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Replace the correlator.
    #[must_use]
    pub fn with_correlator(mut self, correlator: Arc<dyn MessageCorrelator>) -> Self {
        self.correlator = correlator;
        self
    }

    /// Share an existing correlation store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<CorrelationStore<Message>>) -> Self {
        self.store = store;
        self
    }

    /// Endpoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key name this producer saves correlation keys under.
    #[must_use]
    pub fn key_name(&self) -> String {
        self.correlator.key_name(&self.name)
    }

    /// Correlation store replies are delivered to.
    #[must_use]
    pub fn store(&self) -> &Arc<CorrelationStore<Message>> {
        &self.store
    }

    /// Endpoint configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Send a request and start listening for its reply.
    ///
    /// # Errors
    ///
    /// - `BridgeError::MissingCorrelationData` - request lacks the correlation header
    /// - `BridgeError::Send` - the transport failed; no reply will be awaited
    #[instrument(skip(self, message, ctx), fields(endpoint = %self.name, call = %ctx.id()))]
    pub async fn send(&self, mut message: Message, ctx: &mut CallContext) -> Result<(), BridgeError> {
        let key_name = self.key_name();
        let key = match self.correlator.key(&message) {
            Ok(key) => key,
            Err(err) => {
                ctx.set_call_state(&key_name, CallState::Failed);
                return Err(err);
            }
        };

        self.store.save_key(&key_name, &key, ctx);
        ctx.set_call_state(&key_name, CallState::KeySaved);

        let (reply_channel, temporary) = match message.reply_to() {
            Some(name) => (self.registry.get_or_create(name), false),
            None => {
                let channel = self.registry.create_temporary();
                message.set_reply_to(channel.name());
                (channel, true)
            }
        };
        ctx.set_variable(
            format!("{REPLY_CHANNEL_VARIABLE_PREFIX}{key_name}"),
            reply_channel.name(),
        );

        info!(
            key = %key,
            message_id = %message.id(),
            reply_to = %reply_channel.name(),
            "Sending synchronous request"
        );

        if let Err(source) = self.transport.send(message).await {
            ctx.set_call_state(&key_name, CallState::Failed);
            if temporary {
                self.registry.remove(reply_channel.name());
            }
            warn!(key = %key, error = %source, "Failed to send synchronous request");
            return Err(BridgeError::Send {
                endpoint: self.transport.name().to_string(),
                source,
            });
        }

        self.spawn_reply_listener(key, reply_channel, temporary);
        ctx.set_call_state(&key_name, CallState::Sent);
        Ok(())
    }

    /// Wait for the reply to the request sent earlier in this call.
    ///
    /// # Errors
    ///
    /// - `BridgeError::CorrelationNotInitialized` - no prior `send` in this call
    /// - `BridgeError::ReplyTimeout` - no reply before the deadline
    #[instrument(skip(self, ctx), fields(endpoint = %self.name, call = %ctx.id()))]
    pub async fn receive(
        &self,
        ctx: &mut CallContext,
        timeout: Duration,
    ) -> Result<Message, BridgeError> {
        let key_name = self.key_name();
        let key = self.store.get_key(&key_name, ctx)?;
        ctx.set_call_state(&key_name, CallState::AwaitingReply);

        let reply = self.store.find(&key, timeout).await;
        self.stop_listener(&key);

        match reply {
            Some(reply) => {
                ctx.set_call_state(&key_name, CallState::Replied);
                info!(key = %key, message_id = %reply.id(), "Received synchronous reply");
                Ok(reply)
            }
            None => {
                ctx.set_call_state(&key_name, CallState::TimedOut);
                let endpoint = ctx
                    .variable(&format!("{REPLY_CHANNEL_VARIABLE_PREFIX}{key_name}"))
                    .unwrap_or(&self.name)
                    .to_string();
                Err(BridgeError::ReplyTimeout {
                    endpoint,
                    timeout_ms: crate::saturating_millis(timeout),
                })
            }
        }
    }

    /// Wait for the reply to the request sent earlier in this call, using the
    /// configured timeout.
    pub async fn receive_default(&self, ctx: &mut CallContext) -> Result<Message, BridgeError> {
        self.receive(ctx, self.config.timeout).await
    }

    /// Wait for a reply by explicit correlation key, without a call context.
    ///
    /// # Errors
    ///
    /// - `BridgeError::ReplyTimeout` - no reply before the deadline
    pub async fn receive_with_key(&self, key: &str, timeout: Duration) -> Result<Message, BridgeError> {
        let reply = self.store.find(key, timeout).await;
        self.stop_listener(key);

        reply.ok_or_else(|| BridgeError::ReplyTimeout {
            endpoint: self.name.clone(),
            timeout_ms: crate::saturating_millis(timeout),
        })
    }

    /// Deliver an inbound reply, correlating it by its header.
    ///
    /// # Errors
    ///
    /// - `BridgeError::MissingCorrelationData` - reply lacks the correlation header
    pub fn on_reply(&self, reply: Message) -> Result<StoreOutcome, BridgeError> {
        let key = self.correlator.key(&reply)?;
        debug!(endpoint = %self.name, key = %key, "Delivering inbound reply");
        Ok(self.store.store(&key, reply))
    }

    fn spawn_reply_listener(&self, key: String, channel: Arc<SelectiveChannel>, temporary: bool) {
        let store = self.store.clone();
        let registry = self.registry.clone();
        let correlator = self.correlator.clone();
        let listeners = self.listeners.clone();
        // Stopped by `receive`; otherwise outlives the call at most as long as
        // an unconsumed reply would
        let timeout = self.config.timeout.max(self.config.entry_ttl);
        let channel_name = channel.name().to_string();
        let listener_key = key.clone();

        let (registered, wait_registered) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            // The entry below must exist before this task may remove it
            if wait_registered.await.is_err() {
                return;
            }

            let received = if temporary {
                channel.receive(timeout).await
            } else {
                // Shared channel: only take replies for this call
                let expected = listener_key.clone();
                channel
                    .receive_selective(
                        move |m: &Message| correlator.key(m).is_ok_and(|k| k == expected),
                        timeout,
                    )
                    .await
            };

            match received {
                Ok(reply) => {
                    store.store(&listener_key, reply);
                }
                Err(err) => {
                    debug!(key = %listener_key, error = %err, "Reply listener stopped without reply");
                }
            }

            if temporary {
                registry.remove(channel.name());
            }
            listeners.remove(&listener_key);
        });

        self.listeners.insert(
            key,
            ReplyListener {
                abort: handle.abort_handle(),
                channel: channel_name,
                temporary,
            },
        );
        // Receiver only goes away if the task was already aborted
        let _ = registered.send(());
    }

    fn stop_listener(&self, key: &str) {
        if let Some((_, listener)) = self.listeners.remove(key) {
            listener.abort.abort();
            if listener.temporary {
                self.registry.remove(&listener.channel);
            }
        }
    }
}
