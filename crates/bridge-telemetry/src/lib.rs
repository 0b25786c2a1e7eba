//! # Bridge Telemetry
//!
//! Structured logging for processes embedding the reply bridge.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridge_telemetry::{init_tracing, TelemetryConfig};
//!
//! fn main() {
//!     init_tracing(&TelemetryConfig::from_env()).expect("Failed to init tracing");
//!     // Bridge logs (hand-offs, timeouts, late arrivals) are now emitted
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BRIDGE_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `BRIDGE_JSON_LOGS` | `false` | JSON formatted output |
//! | `BRIDGE_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

mod config;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use tracing_setup::init_tracing;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    #[error("Failed to install tracing subscriber: {0}")]
    Init(String),
}

#[doc(hidden)]
pub use tracing as __tracing;

/// Span wrapping the work of one bridge endpoint.
///
/// # Example
///
/// ```rust,ignore
/// use bridge_telemetry::endpoint_span;
///
/// let _span = endpoint_span!("helloEndpoint", key = "K7").entered();
/// ```
#[macro_export]
macro_rules! endpoint_span {
    ($endpoint:expr) => {
        $crate::__tracing::info_span!("endpoint", endpoint = %$endpoint)
    };
    ($endpoint:expr, $($field:tt)*) => {
        $crate::__tracing::info_span!("endpoint", endpoint = %$endpoint, $($field)*)
    };
}
