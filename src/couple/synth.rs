use crate::entry::{Backing, Entry, Visibility};
use crate::trace::event::RawRecord;

use super::{CoupledKind, Registration};

/// Build the synthetic target entry for `origin`, which was materialized from
/// `record` at per-CPU position `origin_pos`.
///
/// The timestamp is the record's raw timestamp so that running the same
/// postprocess steps as the origin yields an identical value. Missing
/// payload fields fall back to the origin's task and CPU.
pub fn synthesize(
    reg: &Registration,
    record: &RawRecord,
    origin: &Entry,
    origin_pos: usize,
) -> Entry {
    let mut visible = Visibility::ALL;

    let (pid, cpu) = match reg.kind {
        CoupledKind::SwitchTarget => {
            let pid = record
                .field_i64("next_pid")
                .and_then(|v| i32::try_from(v).ok())
                .unwrap_or(origin.pid);
            (pid, origin.cpu)
        }
        CoupledKind::WakeupTarget => {
            let pid = record
                .field_i64("pid")
                .and_then(|v| i32::try_from(v).ok())
                .unwrap_or(origin.pid);
            // Provisional; the correction pass replaces it with the CPU the
            // task is actually switched in on.
            let cpu = record
                .field_i64("target_cpu")
                .and_then(|v| i32::try_from(v).ok())
                .filter(|cpu| *cpu >= 0)
                .unwrap_or(origin.cpu);
            // The owning task was derived here, not by generic post-processing.
            visible.remove(Visibility::PLUGIN_UNTOUCHED);
            (pid, cpu)
        }
    };

    Entry {
        timestamp: record.timestamp_ns,
        cpu,
        pid,
        event_id: reg.synthetic_id,
        visible,
        backing: Backing::Synthetic { origin: origin_pos },
    }
}
