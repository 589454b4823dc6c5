//! Command-execution harness with wall-clock timeouts, bounded retries,
//! and forced cleanup of the entire process tree when a timeout fires.
//!
//! The central type is [`Runner`]: it takes a [`CommandSpec`] (an argument
//! vector or a shell string, plus capture options), runs it under a
//! deadline, retries on configured exit codes, and guarantees that a
//! timed-out command leaves no descendant processes behind. Captured
//! output can optionally be validated against required/forbidden text
//! markers.
//!
//! # Example
//!
//! ```no_run
//! use cmdexec::{CommandSpec, RetryPolicy, Runner, RunnerConfig};
//! use std::time::Duration;
//!
//! let mut runner = Runner::new(RunnerConfig::default());
//! let spec = CommandSpec::argv(["echo", "hello"]);
//! let result = runner
//!     .run_raw_with(&spec, Some(Duration::from_secs(30)), &RetryPolicy::none())
//!     .unwrap();
//! assert_eq!(result.stdout, "hello\n");
//! ```
//!
//! Three public operations cover the common calling styles:
//!
//! - [`Runner::run_raw`] never fails on a non-zero exit code; the caller
//!   inspects the returned [`ExecutionResult`].
//! - [`Runner::run`] turns a non-zero final code into
//!   [`ExecError::NonZeroExit`].
//! - [`Runner::run_checked`] additionally validates the captured output
//!   against marker lists and reports [`ExecError::ValidationFailed`].
//!
//! In continuity mode (see [`continuity`]) working-directory and
//! environment changes made by one shell command carry forward into the
//! next command run through the same `Runner`.

pub mod command;
pub mod continuity;
pub mod error;
pub mod process;
pub mod runner;
pub mod validate;

pub use command::{CommandSpec, OutputSink, Program};
pub use continuity::{EnvChannel, EnvSnapshot};
pub use error::{ExecError, Result};
pub use process::{ProcessControl, SysProcessControl};
pub use runner::{ExecutionResult, RetryPolicy, Runner, RunnerConfig, TIMEOUT_EXIT_CODE};
pub use validate::validate;
