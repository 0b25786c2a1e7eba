//! # Error Types
//!
//! Errors surfaced by the bridge to its immediate callers. The bridge never
//! retries on its own; every variant is returned as-is.

use thiserror::Error;

/// Errors from the in-memory selective channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Bounded channel at capacity.
    #[error("Channel '{channel}' is full: capacity of {capacity} messages reached")]
    BufferFull { channel: String, capacity: usize },

    /// Nothing (matching) arrived before the deadline.
    #[error("Timeout after {timeout_ms} milliseconds waiting for message on channel '{channel}'")]
    Timeout { channel: String, timeout_ms: u64 },

    /// No channel registered under this name.
    #[error("Channel '{0}' is not registered")]
    NotFound(String),
}

/// Errors from an underlying transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Receive deadline passed without a message.
    #[error("Transport timeout after {timeout_ms} milliseconds on endpoint '{endpoint}'")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// Transport refused or failed to deliver.
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// Failure of an in-memory channel used as transport.
    #[error(transparent)]
    Channel(ChannelError),
}

impl TransportError {
    /// Returns true for a receive timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<ChannelError> for TransportError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Timeout {
                channel,
                timeout_ms,
            } => Self::Timeout {
                endpoint: channel,
                timeout_ms,
            },
            other => Self::Channel(other),
        }
    }
}

/// Errors of the synchronous request/reply bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Message lacks the configured correlation header.
    #[error("Missing correlation data: header '{header}' not found in message '{message_id}'")]
    MissingCorrelationData { header: String, message_id: String },

    /// `receive` without a prior `send` in the same call context.
    #[error("Failed to get correlation key for '{key_name}' - correlation not initialized in call context")]
    CorrelationNotInitialized { key_name: String },

    /// Request was sent but no reply arrived in time.
    #[error("Action timeout after {timeout_ms} milliseconds. Failed to receive synchronous reply message on endpoint: '{endpoint}'")]
    ReplyTimeout { endpoint: String, timeout_ms: u64 },

    /// A single-slot event future stayed empty until the deadline.
    #[error("Timeout after {timeout_ms} milliseconds waiting for event")]
    AwaitTimeout { timeout_ms: u64 },

    /// A single-slot event future was completed with a failure.
    #[error("Event failed: {0}")]
    EventFailed(String),

    /// Transport failed while sending; no reply wait was attempted.
    #[error("Failed to send message on endpoint '{endpoint}': {source}")]
    Send {
        endpoint: String,
        source: TransportError,
    },

    /// Transport failed while receiving.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No reply channel stored for the call being answered.
    #[error("Failed to find reply channel for message correlation key: '{key}'")]
    ReplyChannelNotFound { key: String },

    /// Channel level failure.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl BridgeError {
    /// "Sent but no answer": the deadline passed.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ReplyTimeout { .. } | Self::AwaitTimeout { .. } => true,
            Self::Transport(err) => err.is_timeout(),
            Self::Channel(err) => matches!(err, ChannelError::Timeout { .. }),
            _ => false,
        }
    }

    /// "Could not ask": the transport failed while sending.
    #[must_use]
    pub fn is_send_failure(&self) -> bool {
        matches!(self, Self::Send { .. })
    }
}
