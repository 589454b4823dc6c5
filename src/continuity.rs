//! Cross-call shell-environment continuity.
//!
//! A shell-mode command can change its working directory or export
//! variables, but those mutations normally die with the shell. In
//! continuity mode the [`Runner`](crate::Runner) keeps them alive across
//! calls: every command is rewritten by an [`EnvChannel`] so that an
//! external environment-manager process can report the shell's
//! environment and cwd after the command runs, and the runner polls that
//! side channel for an [`EnvSnapshot`] which seeds the next command.
//!
//! The manager process itself is an external collaborator; its lifecycle
//! is outside this crate's scope. This module only defines the snapshot
//! value and the channel interface.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Environment state recovered from the managed shell after a command.
///
/// Owned exclusively by one `Runner` instance: created after the first
/// successful attempt, overwritten after each subsequent non-timed-out
/// attempt, never shared across instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSnapshot {
    /// Full environment of the shell after the command ran.
    pub vars: HashMap<String, String>,
    /// Working directory of the shell after the command ran.
    pub cwd: PathBuf,
}

/// Duplex side channel to an already-running environment manager.
pub trait EnvChannel {
    /// Rewrite `command` so the managed shell reports its environment and
    /// cwd once the command has run.
    fn wrap_command(&self, command: &str) -> String;

    /// Poll for a post-command snapshot, waiting at most `grace`.
    ///
    /// `None` means nothing arrived in time; the caller retains its
    /// previous snapshot. A timed-out command produces no snapshot, so
    /// this is only polled after an attempt that completed in time.
    fn poll(&mut self, grace: Duration) -> Option<EnvSnapshot>;
}
