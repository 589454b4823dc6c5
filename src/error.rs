//! Error types for the cmdexec harness.
//!
//! Uses thiserror for derive macros. The two post-exit variants carry the
//! full captured [`ExecutionResult`] so partial output remains inspectable
//! after a failure.

use crate::runner::ExecutionResult;
use thiserror::Error;

/// Main error type for harness operations.
///
/// Spawn failure is the only error that can come out of
/// [`Runner::run_raw`](crate::Runner::run_raw); the other variants are
/// produced by the wrapping operations `run` and `run_checked`.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The OS refused to create the child process (bad executable path,
    /// permission denied, resource exhaustion). Never retried.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        /// The program that could not be started, for diagnostics.
        command: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The command ran to completion but its final exit code was non-zero.
    /// A timed-out command surfaces here with its resolved code (the
    /// signal code, or the timeout sentinel).
    #[error("command exited with code {}", .0.code)]
    NonZeroExit(ExecutionResult),

    /// The command exited acceptably but its output did not pass marker
    /// validation.
    #[error("command output failed validation (exit code {})", .0.code)]
    ValidationFailed(ExecutionResult),
}

impl ExecError {
    /// The captured result carried by `NonZeroExit` and
    /// `ValidationFailed`; `None` for spawn failures, which have no
    /// output to report.
    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            ExecError::NonZeroExit(result) | ExecError::ValidationFailed(result) => Some(result),
            ExecError::Spawn { .. } => None,
        }
    }
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, ExecError>;
