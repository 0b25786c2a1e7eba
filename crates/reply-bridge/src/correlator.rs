//! # Correlation Key Extraction
//!
//! Derives the correlation key of a message and the key namespace of an
//! endpoint. Both functions are pure.

use crate::config::BridgeConfig;
use bridge_types::{BridgeError, Message, MessageHeaders};

/// Derives correlation keys from messages.
pub trait MessageCorrelator: Send + Sync {
    /// Namespace under which an endpoint saves its correlation keys.
    ///
    /// Distinct endpoint names must map to distinct key names.
    fn key_name(&self, endpoint_name: &str) -> String;

    /// Correlation key of a message.
    ///
    /// # Errors
    ///
    /// - `BridgeError::MissingCorrelationData` - the correlation header is absent
    fn key(&self, message: &Message) -> Result<String, BridgeError>;

    /// Mark a reply with the correlation key of the request it answers, so
    /// `key(reply)` yields the request's key.
    fn stamp(&self, reply: &mut Message, key: &str);
}

/// Correlator reading the key verbatim from one header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderCorrelator {
    header_name: String,
}

impl HeaderCorrelator {
    /// Prefix of every key name produced by this correlator.
    pub const KEY_NAME_PREFIX: &'static str = "bridge_message_correlator_";

    /// Correlate on the given header.
    #[must_use]
    pub fn new(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
        }
    }

    /// Correlate on the header configured for the endpoint.
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.correlation_header_name.clone())
    }

    /// The header this correlator reads.
    #[must_use]
    pub fn header_name(&self) -> &str {
        &self.header_name
    }
}

impl Default for HeaderCorrelator {
    fn default() -> Self {
        Self::new(MessageHeaders::ID)
    }
}

impl MessageCorrelator for HeaderCorrelator {
    fn key_name(&self, endpoint_name: &str) -> String {
        format!("{}{}", Self::KEY_NAME_PREFIX, endpoint_name)
    }

    fn key(&self, message: &Message) -> Result<String, BridgeError> {
        message
            .header_as_string(&self.header_name)
            .ok_or_else(|| BridgeError::MissingCorrelationData {
                header: self.header_name.clone(),
                message_id: message.id().to_string(),
            })
    }

    fn stamp(&self, reply: &mut Message, key: &str) {
        reply.set_header(self.header_name.clone(), key);
    }
}
