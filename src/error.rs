//! Error types for the Prologix controller client.
//!
//! Every fallible operation returns [`GpibError`]. The variants follow the
//! three ways a conversation with the adapter can go wrong, plus one for
//! configuration loading:
//!
//! - **`Connection`**: the TCP connection was refused, reset, closed by the
//!   adapter, or the session was already closed locally.
//! - **`Timeout`**: nothing arrived (or the connect did not complete) within
//!   the configured timeout.
//! - **`Decode`**: the adapter answered with bytes that are not 7-bit ASCII.
//! - **`Config`**: a configuration file or environment override could not be
//!   parsed or failed validation.
//!
//! No error is retried inside the driver. The only place a variant is
//! swallowed is [`GpibController::flush`](crate::GpibController::flush),
//! which treats `Timeout` as "buffer empty".

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type Result<T> = std::result::Result<T, GpibError>;

/// Coarse error category, useful for matching without caring about payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpibErrorKind {
    /// Connection refused, reset, closed by peer, or session closed.
    Connection,
    /// Operation did not complete within the timeout.
    Timeout,
    /// Response bytes were not 7-bit ASCII.
    Decode,
    /// Configuration could not be loaded or is invalid.
    Config,
}

impl std::fmt::Display for GpibErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            GpibErrorKind::Connection => "connection",
            GpibErrorKind::Timeout => "timeout",
            GpibErrorKind::Decode => "decode",
            GpibErrorKind::Config => "config",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type for the controller client.
#[derive(Error, Debug)]
pub enum GpibError {
    /// The connection could not be used.
    ///
    /// Covers refused and unreachable hosts, resets, the adapter closing the
    /// socket (a zero-byte read), and any use of a session after
    /// [`close`](crate::GpibController::close).
    #[error("Connection error: {message}")]
    Connection {
        /// What the driver was doing when the connection failed.
        message: String,
        /// Underlying I/O error, if there was one.
        #[source]
        source: Option<std::io::Error>,
    },

    /// No data arrived, or a connect/write did not finish, within `timeout`.
    #[error("Timed out after {timeout:?} while {operation}")]
    Timeout {
        /// Short description of the operation that timed out.
        operation: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The adapter returned bytes outside 7-bit ASCII.
    ///
    /// The protocol is treated as ASCII-only; this is a strict contract.
    #[error("Response is not 7-bit ASCII: {lossy:?}")]
    Decode {
        /// Lossy rendering of the offending bytes, for diagnostics.
        lossy: String,
    },

    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GpibError {
    /// Build a [`GpibError::Connection`] without an underlying I/O error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        GpibError::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Build a [`GpibError::Timeout`].
    #[must_use]
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        GpibError::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Build a [`GpibError::Decode`] from the raw response bytes.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Self {
        GpibError::Decode {
            lossy: String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Classify an I/O error raised while `operation` was in progress.
    ///
    /// OS-level timeouts become [`GpibError::Timeout`]; everything else is a
    /// connection failure.
    #[must_use]
    pub fn from_io(operation: impl Into<String>, timeout: Duration, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                GpibError::timeout(operation, timeout)
            }
            _ => GpibError::Connection {
                message: operation.into(),
                source: Some(err),
            },
        }
    }

    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> GpibErrorKind {
        match self {
            GpibError::Connection { .. } => GpibErrorKind::Connection,
            GpibError::Timeout { .. } => GpibErrorKind::Timeout,
            GpibError::Decode { .. } => GpibErrorKind::Decode,
            GpibError::Config(_) => GpibErrorKind::Config,
        }
    }

    /// True for [`GpibError::Timeout`].
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind() == GpibErrorKind::Timeout
    }
}

impl From<figment::Error> for GpibError {
    fn from(err: figment::Error) -> Self {
        GpibError::Config(err.to_string())
    }
}
