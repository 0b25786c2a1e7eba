//! # Channel Registry
//!
//! Named lookup of channels. Reply destinations travel as channel names in
//! the `bridge_reply_to` header and are resolved here, so producers and
//! consumers receive the registry explicitly instead of looking channels up
//! in process-wide state.

use crate::channel::SelectiveChannel;
use crate::config::BridgeConfig;
use bridge_types::ChannelError;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Prefix of temporary reply channel names.
pub const TEMPORARY_CHANNEL_PREFIX: &str = "bridge_reply_";

/// Registry of named channels shared by producers and consumers.
pub struct ChannelRegistry {
    channels: DashMap<String, Arc<SelectiveChannel>>,
    capacity: Option<usize>,
    polling_interval: Duration,
}

impl ChannelRegistry {
    /// Create an empty registry; created channels are unbounded.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(&BridgeConfig::default())
    }

    /// Create an empty registry whose created channels follow `config`.
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: config.channel_capacity,
            polling_interval: config.polling_interval,
        }
    }

    /// Register a channel under its own name, returning any channel it replaced.
    pub fn register(&self, channel: Arc<SelectiveChannel>) -> Option<Arc<SelectiveChannel>> {
        debug!(channel = %channel.name(), "Registering channel");
        self.channels.insert(channel.name().to_string(), channel)
    }

    /// Channel registered under `name`, created on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<SelectiveChannel> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(self.build(name.to_string())))
            .clone()
    }

    /// Look up a channel by name.
    ///
    /// # Errors
    ///
    /// - `ChannelError::NotFound` - nothing registered under `name`
    pub fn resolve(&self, name: &str) -> Result<Arc<SelectiveChannel>, ChannelError> {
        self.channels
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ChannelError::NotFound(name.to_string()))
    }

    /// Create and register a uniquely named channel for one reply.
    pub fn create_temporary(&self) -> Arc<SelectiveChannel> {
        let name = format!("{}{}", TEMPORARY_CHANNEL_PREFIX, Uuid::new_v4());
        let channel = Arc::new(self.build(name.clone()));
        self.channels.insert(name, channel.clone());
        debug!(channel = %channel.name(), "Created temporary reply channel");
        channel
    }

    /// Unregister a channel.
    pub fn remove(&self, name: &str) -> Option<Arc<SelectiveChannel>> {
        self.channels.remove(name).map(|(_, channel)| channel)
    }

    /// Returns true if a channel is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns true if no channel is registered.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn build(&self, name: String) -> SelectiveChannel {
        let channel = match self.capacity {
            Some(capacity) => SelectiveChannel::with_capacity(name, capacity),
            None => SelectiveChannel::new(name),
        };
        channel.with_polling_interval(self.polling_interval)
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
