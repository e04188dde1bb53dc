//! Error taxonomy for the daemon.
//!
//! Per-entry failures ([`BindError`]) are recorded on the binding row and never
//! leave a reconciliation pass. Shared-setup failures ([`FactoryError`],
//! [`InstallError`]) are surfaced to the caller.

use std::{io, path::PathBuf};

use thiserror::Error;

/// A single binding could not be attached to its pin.
#[derive(Debug, Error)]
pub enum BindError {
    /// The binding was enabled before a pin was chosen.
    #[error("no pin selected")]
    MissingPin,

    /// Pin number outside the range the factory can drive.
    #[error("GPIO {pin} is not a valid input pin")]
    InvalidPin { pin: u32 },

    /// The stored pin is not a pin number at all.
    #[error("GPIO {value} is not a valid input pin")]
    UnreadablePin { value: String },

    /// Another live binding already owns the pin.
    #[error("GPIO {pin} is already in use")]
    PinClaimed { pin: u32 },

    /// Debounce or hold timing that the factory cannot honour.
    #[error("invalid timing for GPIO {pin}: {reason}")]
    InvalidTiming { pin: u32, reason: String },

    /// The driver refused the line.
    #[error("driver error on GPIO {pin}: {source}")]
    Driver {
        pin: u32,
        #[source]
        source: io::Error,
    },

    /// The factory has already been closed.
    #[error("pin factory is closed")]
    FactoryClosed,
}

/// The pin factory itself cannot be used. Fatal at startup.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("GPIO hardware unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to release pin factory: {0}")]
    Close(String),
}

/// A configured action failed to run.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("empty action")]
    Empty,

    #[error("failed to spawn `{action}`: {source}")]
    Spawn {
        action: String,
        #[source]
        source: io::Error,
    },

    #[error("action `{action}` failed: {reason}")]
    Failed { action: String, reason: String },
}

/// The elevated command sequence of the installer failed.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("refusing unsafe {kind} argument {value:?}")]
    InvalidArgument { kind: &'static str, value: String },

    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Persistence failures of the configuration and change-signal stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed store document {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to serialize store document: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("invalid flag name {0:?}")]
    InvalidFlagName(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
