//! # Synchronous Consumer
//!
//! Server side of a synchronous exchange. `receive` reads a request and
//! remembers where its reply must go; `send` routes the reply back there.
//! Reply channels are kept in a correlation store keyed by the request's
//! correlation key, so concurrent calls through one consumer never mix up
//! their reply destinations.

use crate::channel::{SelectiveChannel, Transport};
use crate::config::BridgeConfig;
use crate::correlation_store::CorrelationStore;
use crate::correlator::{HeaderCorrelator, MessageCorrelator};
use crate::registry::ChannelRegistry;
use bridge_types::{BridgeError, CallContext, Message, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Receives requests and answers them on their reply channel.
pub struct SyncConsumer {
    name: String,
    transport: Arc<dyn Transport>,
    registry: Arc<ChannelRegistry>,
    correlator: Arc<dyn MessageCorrelator>,
    reply_channels: CorrelationStore<Arc<SelectiveChannel>>,
    config: BridgeConfig,
}

impl SyncConsumer {
    /// Create a consumer correlating on the configured header.
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        registry: Arc<ChannelRegistry>,
        config: BridgeConfig,
    ) -> Self {
        let name = name.into();
        Self {
            reply_channels: CorrelationStore::new(name.clone(), &config),
            correlator: Arc::new(HeaderCorrelator::from_config(&config)),
            name,
            transport,
            registry,
            config,
        }
    }

    /// Replace the correlator.
    #[must_use]
    pub fn with_correlator(mut self, correlator: Arc<dyn MessageCorrelator>) -> Self {
        self.correlator = correlator;
        self
    }

    /// Endpoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key name this consumer saves correlation keys under.
    #[must_use]
    pub fn key_name(&self) -> String {
        self.correlator.key_name(&self.name)
    }

    /// Number of requests whose reply channel is still held.
    #[must_use]
    pub fn pending_replies(&self) -> usize {
        self.reply_channels.len()
    }

    /// Receive the next request and remember its reply channel.
    ///
    /// A request without a reply channel is returned normally; answering it
    /// later fails with `ReplyChannelNotFound`.
    ///
    /// # Errors
    ///
    /// - `BridgeError::Transport` - nothing arrived in time or the transport failed
    /// - `BridgeError::MissingCorrelationData` - request lacks the correlation header
    #[instrument(skip(self, ctx), fields(endpoint = %self.name, call = %ctx.id()))]
    pub async fn receive(
        &self,
        ctx: &mut CallContext,
        timeout: Duration,
    ) -> Result<Message, BridgeError> {
        let request = self.transport.receive(timeout).await?;

        let key_name = self.key_name();
        let key = self.correlator.key(&request)?;
        self.reply_channels.save_key(&key_name, &key, ctx);

        match request.reply_to() {
            Some(reply_to) => match self.registry.resolve(reply_to) {
                Ok(channel) => {
                    debug!(key = %key, reply_to = %reply_to, "Saving reply channel");
                    self.reply_channels.store(&key, channel);
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "Unable to save reply channel - unknown channel");
                }
            },
            None => {
                warn!(key = %key, "Unable to save reply channel - request has no reply channel");
            }
        }

        info!(key = %key, message_id = %request.id(), "Received synchronous request");
        Ok(request)
    }

    /// Receive the next request using the configured timeout.
    pub async fn receive_default(&self, ctx: &mut CallContext) -> Result<Message, BridgeError> {
        self.receive(ctx, self.config.timeout).await
    }

    /// Send the reply to the request received earlier in this call.
    ///
    /// The reply is stamped with the request's correlation key.
    ///
    /// # Errors
    ///
    /// - `BridgeError::CorrelationNotInitialized` - no prior `receive` in this call
    /// - `BridgeError::ReplyChannelNotFound` - the request had no usable reply channel
    /// - `BridgeError::Send` - the reply channel refused the reply
    #[instrument(skip(self, reply, ctx), fields(endpoint = %self.name, call = %ctx.id()))]
    pub async fn send(&self, mut reply: Message, ctx: &CallContext) -> Result<(), BridgeError> {
        let key = self.reply_channels.get_key(&self.key_name(), ctx)?;

        let channel = self
            .reply_channels
            .find(&key, Duration::ZERO)
            .await
            .ok_or_else(|| BridgeError::ReplyChannelNotFound { key: key.clone() })?;

        self.correlator.stamp(&mut reply, &key);
        info!(key = %key, reply_to = %channel.name(), "Sending synchronous reply");

        channel.send(reply).map_err(|err| BridgeError::Send {
            endpoint: channel.name().to_string(),
            source: TransportError::from(err),
        })
    }
}
