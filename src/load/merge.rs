use crate::entry::{Backing, Entry};

use super::LoadError;

/// Merge per-CPU lists into one array ordered by timestamp.
///
/// Each step scans the heads of all non-empty lists and moves out the one
/// with the smallest timestamp; ties go to the lowest CPU. Entries keep
/// their per-CPU order. Synthetic origin positions, which index the entry's
/// own CPU list on input, are rewritten to indices into the output.
pub fn merge_lists(lists: Vec<Vec<Entry>>) -> Result<Vec<Entry>, LoadError> {
    let total: usize = lists.iter().map(Vec::len).sum();

    let mut merged = Vec::new();
    merged
        .try_reserve_exact(total)
        .map_err(LoadError::alloc("merged entry array"))?;

    // Output index of every entry already emitted, per CPU.
    let mut placed: Vec<Vec<usize>> = Vec::with_capacity(lists.len());
    for list in &lists {
        let mut map = Vec::new();
        map.try_reserve_exact(list.len())
            .map_err(LoadError::alloc("origin index map"))?;
        placed.push(map);
    }

    let mut heads: Vec<_> = lists
        .into_iter()
        .map(|list| list.into_iter().peekable())
        .collect();

    loop {
        let mut best: Option<(usize, u64)> = None;
        for (cpu, head) in heads.iter_mut().enumerate() {
            if let Some(entry) = head.peek() {
                if best.map_or(true, |(_, ts)| entry.timestamp < ts) {
                    best = Some((cpu, entry.timestamp));
                }
            }
        }

        let Some((cpu, _)) = best else {
            break;
        };
        let (Some(head), Some(map)) = (heads.get_mut(cpu), placed.get_mut(cpu)) else {
            break;
        };
        let Some(mut entry) = head.next() else {
            break;
        };

        if let Backing::Synthetic { origin } = entry.backing {
            let global = map
                .get(origin)
                .copied()
                .ok_or(LoadError::DanglingOrigin { cpu, index: origin })?;
            entry.backing = Backing::Synthetic { origin: global };
        }

        map.push(merged.len());
        merged.push(entry);
    }

    Ok(merged)
}
