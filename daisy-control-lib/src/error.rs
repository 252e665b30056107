//! Error types for the Daisy cloud API client.
//!
//! Vendor-side command rejections (device offline, command refused) are not
//! errors: they come back as a [`CommandOutcome`](crate::control_interface::CommandOutcome)
//! with `success == false`. The variants here cover everything that stops a
//! request before or below that level.

use serde_json::Value;
use thiserror::Error;

use crate::command::registry::ValueDomain;

/// All failures the library can report to a caller.
#[derive(Debug, Error)]
pub enum DaisyError {
    /// The vendor rejected the account credentials, or a refreshed session
    /// was still not accepted. Fatal for the session.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// Network-level fault: unreachable host, timeout, or a response body
    /// that was not the JSON shape the vendor normally produces.
    #[error("transport error: {0}")]
    TransportError(String),

    /// No capability descriptor is registered for the device's
    /// `idDevicetype`. Every action on such a device fails closed.
    #[error("no capability descriptor for device type {0}")]
    UnsupportedDevice(u32),

    /// The action is not in the device type's supported set.
    #[error("device type {id_devicetype} does not support {action}")]
    InvalidAction {
        id_devicetype: u32,
        action: &'static str,
    },

    /// A supplied value falls outside the declared domain for the action.
    #[error("value {value} for {action} is outside the domain {domain}")]
    OutOfRange {
        action: &'static str,
        value: i64,
        domain: ValueDomain,
    },

    /// A batch encode was asked to build an envelope with no commands in
    /// it. The feed endpoint expects at least one entry.
    #[error("a command envelope must hold at least one command")]
    EmptyBatch,

    /// The vendor answered a query endpoint with its error envelope
    /// (`codEsito != "S"` or an unexpected `MessageID`). The raw payload is
    /// retained for diagnostics.
    #[error("vendor rejected request to {endpoint}: {raw}")]
    Vendor { endpoint: String, raw: Value },
}

impl From<reqwest::Error> for DaisyError {
    fn from(err: reqwest::Error) -> Self {
        DaisyError::TransportError(err.to_string())
    }
}

impl From<serde_json::Error> for DaisyError {
    fn from(err: serde_json::Error) -> Self {
        DaisyError::TransportError(format!("malformed response body: {err}"))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DaisyError>;
