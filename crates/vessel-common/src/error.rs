//! Unified error types for the Vessel workspace.
//!
//! Primitives return these errors without deciding whether they are fatal;
//! the orchestration layers (bootstrap engine, CLI entry point) make that
//! call and exit with [`VesselError::exit_status`] when they abort.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum VesselError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value or definition file is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A privilege precondition was violated or an identity change failed.
    #[error("privilege error: {message}")]
    Privilege {
        /// Description of the violated precondition.
        message: String,
    },

    /// The user requested non-privileged operation in a privileged install.
    #[error("non-privileged mode requested: {message}")]
    NosuidRequested {
        /// Description of the override.
        message: String,
    },

    /// A namespace unshare operation failed.
    #[error("namespace isolation failed: {message}")]
    Namespace {
        /// Description of the failed unshare.
        message: String,
    },

    /// A mount, unmount, or chroot operation failed.
    #[error("rootfs operation failed at {path}: {message}")]
    Rootfs {
        /// Mount point or target path involved.
        path: PathBuf,
        /// Description of the failed operation.
        message: String,
    },

    /// Spawning or waiting on an external command failed.
    #[error("command execution failed: {command}: {message}")]
    Exec {
        /// The command that could not be run.
        command: String,
        /// Description of the failure.
        message: String,
    },
}

impl VesselError {
    /// Process exit status for this error when it is treated as fatal.
    ///
    /// A user-requested NOSUID override exits with `1`; every other fatal
    /// class exits with `255`, matching the abort statuses of the setup
    /// pipeline. Best-effort failures never reach this path.
    #[must_use]
    pub const fn exit_status(&self) -> i32 {
        match self {
            Self::NosuidRequested { .. } => 1,
            _ => 255,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, VesselError>;
