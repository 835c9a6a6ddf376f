//! CSI error types.
//!
//! All errors in the `libcsi` crate are represented by the [`CsiError`] enum,
//! which derives [`thiserror::Error`] for ergonomic error handling and also
//! implements [`Serialize`]/[`Deserialize`] so errors can travel across the
//! QUIC transport layer.
//!
//! Every variant maps onto one standardized status [`Code`] via
//! [`CsiError::code`], which is what a container orchestrator inspects to
//! decide whether to retry.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum CsiError {
    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested volume was not found.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// Another request is currently operating on the same volume.
    #[error("volumeID {0} is in use by another request")]
    InFlight(String),

    /// A staged file system is still bind mounted somewhere else and must not
    /// be torn down.
    #[error("refused to unmount staged file system at {mount_path} while bind mounted at {bind_path}")]
    BindMounted {
        /// Staging mount point that was about to be unmounted.
        mount_path: String,
        /// Mount point still referencing the staged file system.
        bind_path: String,
    },

    /// The plugin configuration (or a template derived from it) is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A mount operation failed.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// An unmount operation failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        /// Filesystem path where the unmount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The storage backend (e.g. `beegfs-ctl`) returned an error.
    #[error("backend error: {0}")]
    BackendError(String),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The operation is not implemented by this plugin.
    #[error("{0} is not implemented")]
    Unimplemented(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CsiError {
    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Create a [`CsiError::InvalidConfig`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidConfig(e.to_string())
    }

    /// The standardized status code reported to the caller for this error.
    #[must_use]
    pub const fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::VolumeNotFound(_) => Code::NotFound,
            Self::InFlight(_) => Code::Aborted,
            Self::BindMounted { .. } => Code::FailedPrecondition,
            Self::TransportError(_) => Code::Unavailable,
            Self::Unimplemented(_) => Code::Unimplemented,
            Self::InvalidConfig(_)
            | Self::MountFailed { .. }
            | Self::UnmountFailed { .. }
            | Self::BackendError(_)
            | Self::Internal(_) => Code::Internal,
        }
    }
}

/// Standardized status codes.
///
/// These match the [gRPC status codes specification](https://github.com/grpc/grpc/blob/master/doc/statuscodes.md),
/// which is what the CSI specification uses to report errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    /// The operation completed successfully.
    Ok = 0,
    /// The operation was cancelled.
    Cancelled = 1,
    /// Unknown error.
    Unknown = 2,
    /// Client specified an invalid argument.
    InvalidArgument = 3,
    /// Deadline expired before operation could complete.
    DeadlineExceeded = 4,
    /// Some requested entity was not found.
    NotFound = 5,
    /// Some entity that we attempted to create already exists.
    AlreadyExists = 6,
    /// The caller does not have permission to execute the specified operation.
    PermissionDenied = 7,
    /// Some resource has been exhausted.
    ResourceExhausted = 8,
    /// The system is not in a state required for the operation's execution.
    FailedPrecondition = 9,
    /// The operation was aborted.
    Aborted = 10,
    /// Operation was attempted past the valid range.
    OutOfRange = 11,
    /// Operation is not implemented or not supported.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// The service is currently unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// The request does not have valid authentication credentials
    Unauthenticated = 16,
}

impl Code {
    /// Get human-readable description of this code
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Code::Ok => "The operation completed successfully",
            Code::Cancelled => "The operation was cancelled",
            Code::Unknown => "Unknown error",
            Code::InvalidArgument => "Client specified an invalid argument",
            Code::DeadlineExceeded => "Deadline expired before operation could complete",
            Code::NotFound => "Some requested entity was not found",
            Code::AlreadyExists => "Some entity that we attempted to create already exists",
            Code::PermissionDenied => {
                "The caller does not have permission to execute the specified operation"
            }
            Code::ResourceExhausted => "Some resource has been exhausted",
            Code::FailedPrecondition => {
                "The system is not in a state required for the operation's execution"
            }
            Code::Aborted => "The operation was aborted",
            Code::OutOfRange => "Operation was attempted past the valid range",
            Code::Unimplemented => "Operation is not implemented or not supported",
            Code::Internal => "Internal error",
            Code::Unavailable => "The service is currently unavailable",
            Code::DataLoss => "Unrecoverable data loss or corruption",
            Code::Unauthenticated => "The request does not have valid authentication credentials",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
