//! Process table helpers shared by the platform probes.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// `(state, ppid)` from `/proc/<pid>/stat`. The command name may contain
/// spaces and parens, so parsing starts after the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub fn stat_state_and_ppid(stat: &str) -> Option<(char, u32)> {
    let end = stat.rfind(')')?;
    let mut it = stat.get(end + 1..)?.split_whitespace();
    let state = it.next()?.chars().next()?;
    let ppid = it.next()?.parse().ok()?;
    Some((state, ppid))
}

/// All transitive children of `root` (not including `root`), parents first.
#[cfg_attr(windows, allow(dead_code))]
pub fn descendants(root: u32, pairs: &[(u32, u32)]) -> Vec<u32> {
    let mut children: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for &(pid, ppid) in pairs {
        if pid != ppid {
            children.entry(ppid).or_default().push(pid);
        }
    }

    let mut seen = BTreeSet::from([root]);
    let mut out = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        for &child in children.get(&pid).map(Vec::as_slice).unwrap_or_default() {
            if seen.insert(child) {
                out.push(child);
                queue.push_back(child);
            }
        }
    }
    out
}
