//! Error types for Xhare.
//!
//! This module provides a unified error type for all coordinator operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Xhare operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Xhare.
#[derive(Error, Debug)]
pub enum Error {
    /// `send()` issued with no target device (E101)
    #[error("no device selected")]
    NoDeviceSelected,

    /// `send()` issued with no file (E102)
    #[error("no file selected")]
    NoFileSelected,

    /// An outgoing transfer is still waiting or sending (E103)
    #[error("an outgoing transfer is already in progress")]
    TransferInProgress,

    /// `accept()` or `reject()` issued with no pending offer (E104)
    #[error("no incoming transfer request is pending")]
    NoPendingRequest,

    /// `open_destination()` issued with nothing saved to open (E105)
    #[error("no completed incoming transfer to open")]
    NothingToOpen,

    /// Device discovery failed; retried on the next refresh
    #[error("device discovery failed: {0}")]
    Discovery(String),

    /// The command gateway rejected or could not dispatch a call
    #[error("command gateway error: {0}")]
    Gateway(String),

    /// A backend event could not be decoded
    #[error("invalid backend event '{event}': {reason}")]
    InvalidEvent {
        /// Event name as reported by the engine
        event: String,
        /// Reason for rejection
        reason: String,
    },

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// History store error
    #[error("history error: {0}")]
    HistoryError(String),

    /// The coordinator service is no longer running
    #[error("coordinator service stopped")]
    ServiceStopped,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Contract violations carry codes so a UI can map them to fixed messages.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::NoDeviceSelected => Some("E101"),
            Self::NoFileSelected => Some("E102"),
            Self::TransferInProgress => Some("E103"),
            Self::NoPendingRequest => Some("E104"),
            Self::NothingToOpen => Some("E105"),
            _ => None,
        }
    }

    /// Returns whether this error is recoverable (can be retried).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Discovery(_) | Self::Gateway(_))
    }

    /// Returns whether this error is a local precondition failure that never
    /// reached the command gateway.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        self.code().is_some()
    }
}
