//! Descendant discovery from the OS process table.

use std::collections::HashMap;
use sysinfo::{ProcessesToUpdate, System};
use tracing::debug;

/// Find the children of `root` (transitively when `recursive`) from one
/// snapshot of the OS process table.
///
/// Takes a single (pid, parent-pid) listing, builds a parent-to-children
/// adjacency map, then walks it from `root`. The single snapshot matters:
/// enumeration runs just before a kill sweep, and re-querying between
/// signals would miss children whose parent has already died.
///
/// Never fails. A process table that cannot be read simply yields no
/// entries, so the caller's cleanup path still proceeds.
pub fn find_descendants(root: u32, recursive: bool) -> Vec<u32> {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let mut tree: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, process) in sys.processes() {
        if let Some(parent) = process.parent() {
            tree.entry(parent.as_u32()).or_default().push(pid.as_u32());
        }
    }

    let mut found = Vec::new();
    collect(root, &tree, recursive, &mut found);
    debug!("pid {} has {} descendants: {:?}", root, found.len(), found);
    found
}

fn collect(pid: u32, tree: &HashMap<u32, Vec<u32>>, recursive: bool, out: &mut Vec<u32>) {
    if let Some(children) = tree.get(&pid) {
        for &child in children {
            out.push(child);
            if recursive {
                collect(child, tree, recursive, out);
            }
        }
    }
}
