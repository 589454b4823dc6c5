//! Captured command results.

use serde::{Deserialize, Serialize};

/// Exit code reported when a command exceeded its deadline, was forcibly
/// cleaned up, and would otherwise have read as a clean success.
///
/// Only a natural exit code of exactly 0 is overridden: any other code
/// (including a negative signal code from the forced kill) already
/// carries at least as much information and is preserved.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Captured output of one command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured stdout. Empty when output went to a log file.
    pub stdout: String,
    /// Captured stderr. Empty when merged into stdout or logged to file.
    pub stderr: String,
    /// The child's exit code: its real code, the negative signal number
    /// when signal-terminated (unix), or [`TIMEOUT_EXIT_CODE`].
    pub code: i32,
}

impl ExecutionResult {
    /// Whether the command finished with the neutral/success code.
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Flatten to a single string for marker validation: stdout, stderr
    /// and the exit code joined by single spaces.
    pub fn flattened(&self) -> String {
        format!("{} {} {}", self.stdout, self.stderr, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattened_joins_all_three_fields() {
        let result = ExecutionResult {
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            code: 2,
        };
        assert_eq!(result.flattened(), "out err 2");
        assert!(!result.is_success());
    }

    #[test]
    fn success_is_exactly_code_zero() {
        let ok = ExecutionResult {
            stdout: String::new(),
            stderr: String::new(),
            code: 0,
        };
        assert!(ok.is_success());

        let timed_out = ExecutionResult { code: TIMEOUT_EXIT_CODE, ..ok };
        assert!(!timed_out.is_success());
    }
}
