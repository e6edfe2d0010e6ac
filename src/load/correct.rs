use std::collections::HashMap;

use crate::couple::{SWITCH_TARGET_EVENT_ID, WAKEUP_TARGET_EVENT_ID};
use crate::entry::Entry;

/// Give every wake-up target the CPU of the first later switch target of the
/// same task. Targets without a later switch-in keep their provisional CPU.
///
/// Single forward pass over the merged array: wake-up targets wait in a
/// per-task pending list until that task's next switch target resolves them.
/// Returns how many wake-up targets were resolved.
pub fn correct_wakeup_cpus(entries: &mut [Entry]) -> usize {
    let mut pending: HashMap<i32, Vec<usize>> = HashMap::new();
    let mut fixes: Vec<(usize, i32)> = Vec::new();

    for (i, e) in entries.iter().enumerate() {
        match e.event_id {
            WAKEUP_TARGET_EVENT_ID if e.is_synthetic() => {
                pending.entry(e.pid).or_default().push(i);
            }
            SWITCH_TARGET_EVENT_ID if e.is_synthetic() => {
                if let Some(waiting) = pending.remove(&e.pid) {
                    fixes.extend(waiting.into_iter().map(|w| (w, e.cpu)));
                }
            }
            _ => {}
        }
    }

    for &(index, cpu) in &fixes {
        if let Some(target) = entries.get_mut(index) {
            target.cpu = cpu;
        }
    }

    fixes.len()
}
