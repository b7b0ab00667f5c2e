use std::path::PathBuf;

use strum::{Display, IntoStaticStr};
use thiserror::Error;

use crate::reader::BindReport;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read process memory at address {address:#x} ({len} bytes): {message}")]
    Transport {
        address: u64,
        len: usize,
        message: String,
    },

    #[error("No layout matches process identity {identity}")]
    LayoutUnavailable { identity: String },

    #[error("Layout mismatch for version {version}:\n{report}")]
    LayoutMismatch { version: String, report: BindReport },

    #[error("Unknown symbol '{path}' in version {version}: {message}")]
    UnknownSymbol {
        version: String,
        path: String,
        message: String,
    },

    #[error("Unknown type '{name}' in version {version}")]
    UnknownType { version: String, name: String },

    #[error("Pointer recursion exceeded depth {depth} reading {type_name} at {address:#x}")]
    CycleDetected {
        type_name: String,
        address: u64,
        depth: usize,
    },

    #[error("Snapshot cancelled")]
    Cancelled,

    #[error("Snapshot deadline of {millis} ms exceeded")]
    DeadlineExceeded { millis: u64 },

    #[error(
        "Discriminator {discriminator:#x} of {base} at {address:#x} matches no registered concrete type"
    )]
    PolymorphicUnresolved {
        base: String,
        address: u64,
        discriminator: u64,
    },

    #[error("Implausible data at {address:#x}: {message}")]
    Corrupt { address: u64, message: String },

    #[error("Block {address:#x}+{len} was never fetched")]
    Incomplete { address: u64, len: usize },

    #[error("Failed to parse layout file {}: {message}", file.display())]
    LayoutParse { file: PathBuf, message: String },

    #[error("Session is closed")]
    SessionClosed,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`] for collaborators that only need
/// to surface what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum ErrorKind {
    TransportFailure,
    LayoutUnavailable,
    LayoutMismatch,
    UnknownSymbol,
    UnknownType,
    CycleDetected,
    Cancelled,
    PolymorphicUnresolved,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport { .. } | Error::Corrupt { .. } | Error::Incomplete { .. } => {
                ErrorKind::TransportFailure
            }
            Error::LayoutUnavailable { .. } => ErrorKind::LayoutUnavailable,
            Error::LayoutMismatch { .. } => ErrorKind::LayoutMismatch,
            Error::UnknownSymbol { .. } => ErrorKind::UnknownSymbol,
            Error::UnknownType { .. } => ErrorKind::UnknownType,
            Error::CycleDetected { .. } => ErrorKind::CycleDetected,
            Error::Cancelled | Error::DeadlineExceeded { .. } => ErrorKind::Cancelled,
            Error::PolymorphicUnresolved { .. } => ErrorKind::PolymorphicUnresolved,
            _ => ErrorKind::Other,
        }
    }

    /// Errors that come from reading the foreign process rather than from
    /// layouts or configuration. A snapshot failing with either kind closes
    /// its session.
    pub fn is_snapshot_fatal(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::LayoutUnavailable | ErrorKind::LayoutMismatch | ErrorKind::Other
        )
    }

    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    pub(crate) fn transport(address: u64, len: usize, message: impl Into<String>) -> Self {
        Error::Transport {
            address,
            len,
            message: message.into(),
        }
    }
}
