//! Custom error types for the simulator.
//!
//! `SimError` is the crate-level error. It follows the same split the device
//! protocol uses:
//!
//! - **Transport errors** (`Io`, `InvalidUtf8`) end the connection they occur on.
//!   They are logged by the connection handler and never reach the client.
//! - **Setup errors** (`Config`, `Configuration`) stop the process before the
//!   listener is bound.
//! - **`Codec`** wraps waveform decode failures, which only client-side tooling and
//!   tests produce; the simulator itself only encodes.
//!
//! Protocol-level failures (unknown command, unparsable `SET_PARAMS` payload) are
//! not `SimError`s. They are answered on the wire, see [`crate::protocol::ProtocolError`].

use crate::record::CodecError;
use thiserror::Error;

/// Convenience alias for results using the simulator error type.
pub type SimResult<T> = std::result::Result<T, SimError>;

/// Crate-level error type.
#[derive(Error, Debug)]
pub enum SimError {
    /// Configuration could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Socket or file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A request was not valid UTF-8.
    #[error("Received data is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A waveform field could not be decoded.
    #[error("Waveform codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<figment::Error> for SimError {
    fn from(err: figment::Error) -> Self {
        SimError::Config(Box::new(err))
    }
}

impl SimError {
    /// Whether the error only affects a single connection.
    ///
    /// Connection-scoped errors are logged and the handler exits; everything else
    /// is fatal to the process.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(self, SimError::Io(_) | SimError::InvalidUtf8(_))
    }
}
