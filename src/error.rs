//! Typed error hierarchy for the bridge.

use thiserror::Error;

/// UVC `bRequestErrorCode` values, reported to the host via the
/// `REQUEST_ERROR_CODE_CONTROL` selector and used internally to pick a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestErrorCode {
    /// No error.
    NoError,
    /// The requested control is not supported by the addressed entity.
    InvalidControl,
    /// The request type (`bRequest`) is not valid for this control.
    InvalidRequest,
    /// The value lies outside the control's advertised range.
    OutOfRange,
    /// `wIndex` named an entity this bridge does not implement.
    InvalidUnit,
}

impl RequestErrorCode {
    /// The single byte returned for `GET_CUR` on `REQUEST_ERROR_CODE_CONTROL`.
    #[must_use]
    pub const fn wire_value(self) -> u8 {
        match self {
            Self::NoError => 0x00,
            Self::InvalidUnit => 0x02,
            Self::InvalidControl => 0x06,
            Self::InvalidRequest => 0x07,
            Self::OutOfRange => 0x08,
        }
    }
}

/// Errors that can terminate startup or the bridge event loop.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The configuration filesystem produced no usable rows.
    #[error("no UVC format descriptors found under {0}")]
    ConfigMissing(String),

    /// A configuration value could not be interpreted.
    #[error("malformed configuration value at {path}: {reason}")]
    ConfigMalformed {
        /// Path of the offending file.
        path: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Opening a kernel video node failed.
    #[error("failed to open {path}: {source}")]
    DeviceOpen {
        /// Path that failed to open.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The opened node lacks the capability bits this endpoint's role requires.
    #[error("{path} lacks required capabilities for role {role}")]
    WrongCapability {
        /// Path of the offending node.
        path: String,
        /// The role that was requested (capture or output).
        role: &'static str,
    },

    /// A UVC control-plane request could not be satisfied.
    #[error("protocol error: {0:?}")]
    Protocol(RequestErrorCode),

    /// A raw syscall failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The readiness wait timed out while the capture side was streaming.
    #[error("stalled waiting for buffer readiness while streaming")]
    Stall,

    /// A CLI argument was invalid.
    #[error("invalid argument: {0}")]
    BadArgument(String),
}

impl BridgeError {
    /// Process exit code `main` should use for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }
}

/// Result alias used throughout the bridge.
pub type Result<T> = std::result::Result<T, BridgeError>;
