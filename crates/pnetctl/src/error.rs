//! Error types and exit-code mapping.
//!
//! Enumeration failures are fatal to the whole command and carry distinct
//! exit codes per phase. Local-configuration read failures never surface
//! here; they degrade to an unset pnetid.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::Subsystem;

/// Result type alias for pnetctl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while scanning devices or talking to the
/// pnetid registry.
#[derive(Debug, Error)]
pub enum Error {
    /// The sysfs root could not be opened.
    #[error("failed to open sysfs root {path}: {source}")]
    Context {
        /// The sysfs root path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A device class listing could not be set up.
    #[error("failed to enumerate {subsystem} devices at {path}: {source}")]
    Enumerate {
        /// The subsystem being listed.
        subsystem: Subsystem,
        /// The listing path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A subsystem filter names a class the walker cannot enumerate.
    #[error("no device listing for subsystem {subsystem}")]
    Filter {
        /// The unsupported subsystem.
        subsystem: Subsystem,
    },

    /// Iterating a device listing failed mid-scan.
    #[error("device scan failed in {path}: {source}")]
    Scan {
        /// The listing path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A single enumerated device could not be materialized.
    #[error("failed to read device node {path}: {reason}")]
    Node {
        /// The device path.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Inserting a row into the device table violated a table invariant.
    #[error("failed to insert device \"{name}\" into device table: {reason}")]
    Insert {
        /// The device name.
        name: String,
        /// The violated invariant.
        reason: String,
    },

    /// A registry transport operation failed.
    #[error("netlink {operation} failed: {source}")]
    Netlink {
        /// The operation that failed.
        operation: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A pnetid failed boundary validation.
    #[error("invalid pnetid \"{value}\": {reason}")]
    InvalidPnetid {
        /// The offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Command line usage error.
    #[error("{0}")]
    Usage(String),
}

impl Error {
    /// Creates a netlink error.
    pub fn netlink(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Netlink {
            operation: operation.into(),
            source,
        }
    }

    /// Creates an invalid-pnetid error.
    pub fn invalid_pnetid(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPnetid {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Process exit code for this error.
    ///
    /// Scan phases keep their own codes so a failed invocation tells the
    /// caller which phase gave out; usage-class errors use the
    /// conventional code 2.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Context { .. } => 1,
            Error::Enumerate { .. } => 2,
            Error::Filter { .. } => 3,
            Error::Scan { .. } => 4,
            Error::Node { .. } => 5,
            Error::Insert { .. } => 6,
            Error::Netlink { .. } => 1,
            Error::InvalidPnetid { .. } | Error::Usage(_) => 2,
        }
    }
}
