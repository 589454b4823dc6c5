//! Process-table enumeration and best-effort termination.
//!
//! Everything in this module is best-effort: cleanup after a timed-out
//! command must always run to completion, so enumeration problems yield
//! empty results and signal-delivery problems are logged and ignored
//! (a pid that already exited is not an error).

mod kill;
mod tree;

pub use kill::{kill, kill_pids, kill_tree, terminate};
pub use tree::find_descendants;

/// Platform abstraction the [`Runner`](crate::Runner) depends on for
/// timeout cleanup. The live implementation is [`SysProcessControl`];
/// tests substitute recorders to observe call ordering.
pub trait ProcessControl {
    /// Children of `root` discovered from the OS process table
    /// (transitively when `recursive`). Never fails; an empty result lets
    /// the cleanup path proceed.
    fn descendants(&self, root: u32, recursive: bool) -> Vec<u32>;

    /// Request graceful termination of one process.
    fn terminate(&self, pid: u32);

    /// Forcibly kill one process.
    fn kill(&self, pid: u32);

    /// Kill a whole process tree rooted at `root`.
    fn kill_tree(&self, root: u32, kill_group: bool);
}

/// Live implementation backed by the OS process table and signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysProcessControl;

impl ProcessControl for SysProcessControl {
    fn descendants(&self, root: u32, recursive: bool) -> Vec<u32> {
        tree::find_descendants(root, recursive)
    }

    fn terminate(&self, pid: u32) {
        kill::terminate(pid);
    }

    fn kill(&self, pid: u32) {
        kill::kill(pid);
    }

    fn kill_tree(&self, root: u32, kill_group: bool) {
        kill::kill_tree(root, kill_group);
    }
}
