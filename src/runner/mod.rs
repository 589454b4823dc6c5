//! Execution controller: retries, timeout supervision, forced cleanup.
//!
//! A [`Runner`] performs one logical "run a command" request at a time.
//! Each attempt spawns a fresh worker task and waits on it bounded by the
//! wall-clock timeout. An attempt that outlives its deadline is forcibly
//! resolved: the child's descendant tree is enumerated *before* any
//! signal is sent, the child is terminated then killed, every enumerated
//! descendant is killed individually, and the worker is re-joined to
//! flush partial output. There is no abandoned state; every attempt
//! either completes or is forcibly resolved before the runner proceeds.

mod result;
mod worker;

#[cfg(test)]
mod tests;

pub use result::{ExecutionResult, TIMEOUT_EXIT_CODE};

use crate::command::{CommandSpec, OutputSink, Program};
use crate::continuity::{EnvChannel, EnvSnapshot};
use crate::error::{ExecError, Result};
use crate::process::{ProcessControl, SysProcessControl};
use crate::validate::validate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, warn};
use worker::{JoinResult, PreparedCommand, Worker};

/// Default wall-clock timeout for one attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Default delay between the graceful terminate and the forced kill.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);
/// Default delay slept before re-attempting a command.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// When and how often a command is re-attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first; total attempts = `retries + 1`.
    pub retries: u32,
    /// Delay slept before every attempt after the first.
    pub delay: Duration,
    /// Exit codes that force a retry even though the process has exited.
    /// A timed-out attempt participates through its resolved code (the
    /// signal code, or [`TIMEOUT_EXIT_CODE`] when the natural code read
    /// as success).
    pub retry_on_codes: Vec<i32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            delay: DEFAULT_RETRY_DELAY,
            retry_on_codes: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            retries: 0,
            delay: Duration::ZERO,
            retry_on_codes: Vec::new(),
        }
    }

    fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    fn should_retry(&self, code: i32) -> bool {
        self.retry_on_codes.contains(&code)
    }
}

/// Per-instance configuration for a [`Runner`].
///
/// All values are explicit and owned by the instance; there is no
/// process-wide mutable state.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Default deadline for one attempt. `None` disables the deadline.
    pub timeout: Option<Duration>,
    /// Default retry policy.
    pub retry: RetryPolicy,
    /// Delay between graceful terminate and forced kill on timeout; also
    /// the grace used when re-joining the worker after cleanup.
    pub kill_grace: Duration,
    /// Default stderr-merge behavior for specs that do not set one.
    pub merge_stderr: bool,
    /// Default log file for specs that do not choose a sink. `None`
    /// captures in memory.
    pub log_file: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            retry: RetryPolicy::default(),
            kill_grace: DEFAULT_KILL_GRACE,
            merge_stderr: false,
            log_file: None,
        }
    }
}

/// Orchestrates command execution: retries, timeout supervision, forced
/// process-tree cleanup, and optional cross-call environment continuity.
///
/// Attempts within one instance are strictly sequential; there is no
/// pool and no parallel attempts. The environment snapshot (continuity
/// mode) is private to the instance.
pub struct Runner {
    config: RunnerConfig,
    process: Box<dyn ProcessControl>,
    continuity: Option<Box<dyn EnvChannel>>,
    snapshot: Option<EnvSnapshot>,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_process_control(config, Box::new(SysProcessControl))
    }

    /// Substitute the process-control backend (tests inject recorders).
    pub fn with_process_control(config: RunnerConfig, process: Box<dyn ProcessControl>) -> Self {
        Self {
            config,
            process,
            continuity: None,
            snapshot: None,
        }
    }

    /// Enable continuity mode: environment and cwd changes made by one
    /// shell command carry forward into the next command run through this
    /// instance, recovered via `channel`. Forces shell interpretation for
    /// every command.
    pub fn with_continuity(config: RunnerConfig, channel: Box<dyn EnvChannel>) -> Self {
        Self {
            config,
            process: Box::new(SysProcessControl),
            continuity: Some(channel),
            snapshot: None,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The last environment snapshot recovered in continuity mode.
    pub fn snapshot(&self) -> Option<&EnvSnapshot> {
        self.snapshot.as_ref()
    }

    /// Run a command using the instance's default timeout and retry
    /// policy; the result is returned as-is, non-zero codes included.
    pub fn run_raw(&mut self, spec: &CommandSpec) -> Result<ExecutionResult> {
        let timeout = self.config.timeout;
        let retry = self.config.retry.clone();
        self.run_raw_with(spec, timeout, &retry)
    }

    /// Run a command with explicit timeout and retry policy.
    ///
    /// Attempts = `retries + 1`, with `retry.delay` slept before every
    /// attempt after the first. Only the final attempt's result is
    /// returned. The only error is spawn failure, which is never retried;
    /// a timeout resolves into the result (code [`TIMEOUT_EXIT_CODE`]
    /// when the natural code read as success) and is retried only when
    /// its resolved code is listed in `retry.retry_on_codes`.
    pub fn run_raw_with(
        &mut self,
        spec: &CommandSpec,
        timeout: Option<Duration>,
        retry: &RetryPolicy,
    ) -> Result<ExecutionResult> {
        let attempts = retry.attempts();
        let mut result = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                debug!("attempt {}/{} after {:?} delay", attempt, attempts, retry.delay);
                std::thread::sleep(retry.delay);
            }

            let prepared = self.prepare(spec);
            debug!("executing '{}' (attempt {})", prepared.program.to_shell_string(), attempt);
            let attempt_worker = Worker::spawn(prepared)?;
            let pid = attempt_worker.pid();

            let attempt_result = match attempt_worker.join(timeout) {
                JoinResult::Completed(output) => {
                    // A command that ran to completion may have left a
                    // fresh snapshot on the side channel.
                    self.refresh_snapshot(retry.delay);
                    output
                }
                JoinResult::TimedOut(blocked) => {
                    error!(
                        "command timed out after {:?}; cleaning up pid {} and its descendants",
                        timeout, pid
                    );
                    self.cleanup_timed_out(blocked, pid)
                }
            };

            let keep_trying = retry.should_retry(attempt_result.code);
            result = Some(attempt_result);
            if !keep_trying {
                break;
            }
        }

        // The loop always runs at least once.
        Ok(result.unwrap_or_else(|| ExecutionResult {
            stdout: String::new(),
            stderr: String::new(),
            code: 1,
        }))
    }

    /// Run a command and fail on a non-zero final exit code.
    pub fn run(&mut self, spec: &CommandSpec) -> Result<ExecutionResult> {
        let timeout = self.config.timeout;
        let retry = self.config.retry.clone();
        self.run_with(spec, timeout, &retry)
    }

    /// [`Self::run`] with explicit timeout and retry policy.
    pub fn run_with(
        &mut self,
        spec: &CommandSpec,
        timeout: Option<Duration>,
        retry: &RetryPolicy,
    ) -> Result<ExecutionResult> {
        let result = self.run_raw_with(spec, timeout, retry)?;
        if !result.is_success() {
            error!(
                "command failed with code {}\nstdout: {}\nstderr: {}",
                result.code, result.stdout, result.stderr
            );
            return Err(ExecError::NonZeroExit(result));
        }
        Ok(result)
    }

    /// Run a command, fail on non-zero exit, then validate the captured
    /// output against marker lists (forbidden markers win over required
    /// ones). The raw result rides along in the error on mismatch.
    pub fn run_checked(
        &mut self,
        spec: &CommandSpec,
        required_any_of: &[&str],
        forbidden_any_of: &[&str],
    ) -> Result<ExecutionResult> {
        let timeout = self.config.timeout;
        let retry = self.config.retry.clone();
        self.run_checked_with(spec, required_any_of, forbidden_any_of, timeout, &retry)
    }

    /// [`Self::run_checked`] with explicit timeout and retry policy.
    pub fn run_checked_with(
        &mut self,
        spec: &CommandSpec,
        required_any_of: &[&str],
        forbidden_any_of: &[&str],
        timeout: Option<Duration>,
        retry: &RetryPolicy,
    ) -> Result<ExecutionResult> {
        let result = self.run_with(spec, timeout, retry)?;
        if !validate(&result.flattened(), required_any_of, forbidden_any_of) {
            warn!("command output was not validated");
            return Err(ExecError::ValidationFailed(result));
        }
        Ok(result)
    }

    /// Resolve a spec against instance defaults and continuity state.
    fn prepare(&self, spec: &CommandSpec) -> PreparedCommand {
        let program = match &self.continuity {
            // Continuity forces shell interpretation so the managed
            // shell can report environment mutations afterwards.
            Some(channel) => Program::Shell(channel.wrap_command(&spec.program.to_shell_string())),
            None => spec.program.clone(),
        };

        let cwd = spec
            .cwd
            .clone()
            .or_else(|| self.snapshot.as_ref().map(|s| s.cwd.clone()));

        let mut env: Vec<(String, String)> = Vec::new();
        let env_clear = self.continuity.is_some() && self.snapshot.is_some();
        if env_clear {
            if let Some(snapshot) = &self.snapshot {
                env.extend(snapshot.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        // The caller's overlay wins over snapshot values.
        env.extend(spec.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        PreparedCommand {
            program,
            cwd,
            env_clear,
            env,
            merge_stderr: spec.merge_stderr.unwrap_or(self.config.merge_stderr),
            sink: spec.sink.clone().unwrap_or_else(|| match &self.config.log_file {
                Some(path) => OutputSink::File(path.clone()),
                None => OutputSink::Memory,
            }),
        }
    }

    /// Poll the continuity channel for a post-command snapshot, keeping
    /// the previous one if nothing arrives within the grace window.
    fn refresh_snapshot(&mut self, grace: Duration) {
        if let Some(channel) = self.continuity.as_deref_mut() {
            if let Some(snapshot) = channel.poll(grace) {
                debug!("environment snapshot updated (cwd {})", snapshot.cwd.display());
                self.snapshot = Some(snapshot);
            }
        }
    }

    /// Forcibly resolve a timed-out attempt. Strict order: enumerate the
    /// descendant tree, terminate the child, sleep the kill grace, kill
    /// the child, kill each enumerated descendant, re-join the worker.
    /// Best-effort throughout; this path never fails.
    fn cleanup_timed_out(&mut self, blocked: Worker, pid: u32) -> ExecutionResult {
        // Enumerate before any signal: killing the root first would
        // orphan descendants and break the parent-pid walk.
        let descendants = self.process.descendants(pid, true);

        self.process.terminate(pid);
        std::thread::sleep(self.config.kill_grace);
        self.process.kill(pid);

        // Descendants are not guaranteed to die with their parent.
        for &child in &descendants {
            self.process.kill(child);
        }

        let mut result = blocked.rejoin(self.config.kill_grace);
        if result.code == 0 {
            // The kill lost the race to a fast natural exit; without the
            // sentinel the caller could not tell this from a clean finish.
            result.code = TIMEOUT_EXIT_CODE;
        }
        result
    }
}
