//! Error handling module for repairctl
//!
//! Provides centralized error handling with proper error types using thiserror.
//! All errors in the repair pipeline should use these types for consistency,
//! because the process exit code is derived from the variant.

use std::path::PathBuf;
use thiserror::Error;

/// Which probed attribute disagreed with the expected layout.
///
/// Kept as a dedicated enum so callers (and tests) can tell a wrong
/// filesystem signature apart from a wrong partition label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MismatchKind {
    /// The filesystem-type signature on the partition is wrong.
    FsType { expected: String, found: String },
    /// The GPT partition label is wrong.
    Label { expected: String, found: String },
}

impl std::fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MismatchKind::FsType { expected, found } => {
                write!(f, "filesystem type (expected {expected}, found {found})")
            }
            MismatchKind::Label { expected, found } => {
                write!(f, "partition label (expected {expected}, found {found})")
            }
        }
    }
}

/// Main error type for repairctl
#[derive(Error, Debug)]
pub enum RepairError {
    /// Bad layout or expectation definitions, caught before any device mutation
    #[error("Configuration error: {0}")]
    Config(String),

    /// A live partition disagrees with the expected layout. Always fatal,
    /// never auto-corrected: proceeding could destroy a differently-owned
    /// partition.
    #[error("Verification mismatch on {device}: {kind}")]
    VerificationMismatch { device: PathBuf, kind: MismatchKind },

    /// A required external utility is missing
    #[error("Required tool not available: {0}")]
    ToolUnavailable(String),

    /// Block copy, format, or mount/unmount failure
    #[error("I/O error: {0}")]
    Io(String),

    /// The sanitize status log reported a value outside the modeled states
    #[error("Unexpected hardware state: {0}")]
    HardwareState(String),

    /// Standard IO errors (file operations, spawning)
    #[error("IO error: {0}")]
    StdIo(#[from] std::io::Error),

    /// JSON serialization/deserialization errors (config file)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for repair operations
pub type Result<T> = std::result::Result<T, RepairError>;

impl RepairError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an I/O error from a failed step
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Create a hardware-state error
    pub fn hardware(msg: impl Into<String>) -> Self {
        Self::HardwareState(msg.into())
    }

    /// Process exit code for this error.
    ///
    /// Callers must be able to distinguish "refused due to inconsistent
    /// state" from "hardware/tool error", so the codes are part of the
    /// external interface:
    /// - 2: verification mismatch
    /// - 3: missing required external tool
    /// - 4: sanitize in an unexpected hardware state
    /// - 1: everything else (config, I/O, generic step failure)
    pub fn exit_code(&self) -> i32 {
        match self {
            RepairError::VerificationMismatch { .. } => 2,
            RepairError::ToolUnavailable(_) => 3,
            RepairError::HardwareState(_) => 4,
            _ => 1,
        }
    }
}
