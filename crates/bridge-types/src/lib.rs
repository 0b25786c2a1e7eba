//! # Bridge Types Crate
//!
//! This crate contains the message model, the per-call context and the error
//! taxonomy used by the request/reply bridge.
//!
//! ## Design Principles
//!
//! - **Generic Headers**: The header map stays a string-keyed map of dynamic
//!   values, because headers are defined by whichever protocol is plugged in.
//! - **Typed Accessors**: Headers the bridge itself reads or writes are only
//!   touched through [`MessageHeaders`] constants and accessor methods.
//! - **Distinct Failures**: "sent but no reply" and "failed to send" are
//!   different error variants.

pub mod context;
pub mod errors;
pub mod message;

pub use context::{CallContext, CallState};
pub use errors::*;
pub use message::{HeaderMap, Message, MessageHeaders};
