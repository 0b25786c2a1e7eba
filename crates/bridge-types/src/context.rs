//! # Call Context
//!
//! Call-scoped state for one logical synchronous exchange: the variables a
//! producer saves on `send` (correlation key, reply destination) and the
//! per-endpoint state of the call.

use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// State of a synchronous call through one endpoint.
///
/// `Init → KeySaved → Sent → AwaitingReply → {Replied | TimedOut | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallState {
    /// Nothing happened yet.
    #[default]
    Init,
    /// Correlation key was derived and saved.
    KeySaved,
    /// Request was handed to the transport.
    Sent,
    /// Waiting on the correlation store for the reply.
    AwaitingReply,
    /// Reply was delivered.
    Replied,
    /// No reply arrived before the deadline.
    TimedOut,
    /// Transport or correlation failure.
    Failed,
}

impl CallState {
    /// Returns true for `Replied`, `TimedOut` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Replied | Self::TimedOut | Self::Failed)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::KeySaved => "KEY_SAVED",
            Self::Sent => "SENT",
            Self::AwaitingReply => "AWAITING_REPLY",
            Self::Replied => "REPLIED",
            Self::TimedOut => "TIMED_OUT",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Variables and call states of one logical call.
///
/// Each concurrent call owns its own context; the bridge never shares one
/// between calls.
#[derive(Debug, Clone)]
pub struct CallContext {
    id: Uuid,
    variables: HashMap<String, String>,
    states: HashMap<String, CallState>,
}

impl CallContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            variables: HashMap::new(),
            states: HashMap::new(),
        }
    }

    /// Unique id of this call, used in log fields.
    #[must_use]
    pub fn id(&self) -> &Uuid {
        &self.id
    }

    /// Set a variable, replacing any previous value.
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Look up a variable.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Returns true if the variable is set.
    #[must_use]
    pub fn contains_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Remove a variable.
    pub fn remove_variable(&mut self, name: &str) -> Option<String> {
        self.variables.remove(name)
    }

    /// Record the call state for an endpoint key name.
    pub fn set_call_state(&mut self, key_name: &str, state: CallState) {
        self.states.insert(key_name.to_string(), state);
    }

    /// Current call state for an endpoint key name (`Init` if untouched).
    #[must_use]
    pub fn call_state(&self, key_name: &str) -> CallState {
        self.states.get(key_name).copied().unwrap_or_default()
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}
