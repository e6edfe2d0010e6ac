//! Per-CPU acquisition: one pass over each CPU's records in file order,
//! materializing entries and, when coupling is enabled, their synthetic
//! targets.

use rayon::prelude::*;

use crate::couple::synth::synthesize;
use crate::couple::{registration_for_origin, CouplingState};
use crate::entry::{Backing, Entry, Visibility};
use crate::tasks::TaskTable;
use crate::trace::event::{EventKind, RawRecord, OVERFLOW_EVENT_ID};
use crate::trace::stats::KindStats;
use crate::trace::RecordSource;

use super::{LoadError, Pipeline};

/// Overflow entries are stamped this far before the record that reported
/// the loss, unless that would put them before the CPU's previous entry.
pub const OVERFLOW_BACKSTEP_NS: u64 = 10;

const MIN_GROWTH: usize = 1024;

/// Entries acquired from one CPU, in generation order.
#[derive(Debug, Default)]
pub struct CpuList {
    pub cpu: usize,
    pub entries: Vec<Entry>,
    /// Coupled kinds seen on this CPU.
    pub coupling: CouplingState,
    pub records: u64,
    pub synthetic: u64,
    pub overflow: u64,
    pub missed: u64,
}

impl CpuList {
    fn new(cpu: usize) -> Self {
        Self {
            cpu,
            ..Default::default()
        }
    }

    /// Append, growing through `try_reserve` so allocation failure surfaces
    /// as an error. Returns the new entry's position.
    fn push(&mut self, entry: Entry) -> Result<usize, LoadError> {
        if self.entries.len() == self.entries.capacity() {
            let additional = self.entries.capacity().max(MIN_GROWTH);
            self.entries
                .try_reserve(additional)
                .map_err(LoadError::alloc("per-cpu entry list"))?;
        }
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }
}

/// Build a normalized entry from one raw record. Hooks are not applied.
pub fn materialize(record: &RawRecord, cpu: i32) -> Entry {
    Entry {
        timestamp: record.timestamp_ns,
        cpu,
        pid: record.pid,
        event_id: i32::from(record.kind),
        visible: Visibility::ALL,
        backing: Backing::Record {
            offset: record.offset,
        },
    }
}

/// Build the entry that stands for `count` dropped records right before `real`.
///
/// `not_before` is the timestamp of the CPU's previous entry; the result never
/// sorts ahead of it or after `real`.
pub fn overflow_entry(real: &Entry, count: u32, not_before: u64) -> Entry {
    Entry {
        timestamp: real
            .timestamp
            .saturating_sub(OVERFLOW_BACKSTEP_NS)
            .max(not_before)
            .min(real.timestamp),
        cpu: real.cpu,
        pid: real.pid,
        event_id: OVERFLOW_EVENT_ID,
        visible: Visibility::ALL,
        backing: Backing::Missed { count },
    }
}

/// Acquire every CPU of `source`, sequentially or on the rayon pool.
///
/// Lists come back in CPU order either way.
pub fn acquire_all(
    source: &dyn RecordSource,
    pipeline: &Pipeline<'_>,
    tasks: &TaskTable,
    stats: &KindStats,
) -> Result<Vec<CpuList>, LoadError> {
    let acquirer = Acquirer {
        source,
        pipeline,
        tasks,
        stats,
    };
    let cpus = source.cpu_count();

    if pipeline.parallel {
        (0..cpus)
            .into_par_iter()
            .map(|cpu| acquirer.acquire_cpu(cpu))
            .collect()
    } else {
        (0..cpus).map(|cpu| acquirer.acquire_cpu(cpu)).collect()
    }
}

struct Acquirer<'a> {
    source: &'a dyn RecordSource,
    pipeline: &'a Pipeline<'a>,
    tasks: &'a TaskTable,
    stats: &'a KindStats,
}

impl Acquirer<'_> {
    fn acquire_cpu(&self, cpu: usize) -> Result<CpuList, LoadError> {
        let source_err = |source| LoadError::Source { cpu, source };
        let mut cursor = self.source.cursor(cpu).map_err(source_err)?;
        let cpu_id = i32::try_from(cpu).unwrap_or(i32::MAX);
        let mut list = CpuList::new(cpu);

        while let Some(record) = cursor.next_record().map_err(source_err)? {
            self.stats.record(record.kind);
            list.records += 1;
            self.learn_tasks(&record);

            let mut entry = materialize(&record, cpu_id);
            self.finish(&record, &mut entry);

            if record.missed > 0 {
                let prev = list.entries.last().map_or(0, |e| e.timestamp);
                let mut lost = overflow_entry(&entry, record.missed, prev);
                self.pipeline.filter.apply(&mut lost);
                list.push(lost)?;
                list.overflow += 1;
                list.missed += u64::from(record.missed);
            }

            let origin_pos = list.push(entry)?;

            if !self.pipeline.coupling {
                continue;
            }
            let Some(reg) = registration_for_origin(entry.event_id) else {
                continue;
            };

            let mut target = synthesize(reg, &record, &entry, origin_pos);
            self.tasks.register(target.pid);
            self.finish(&record, &mut target);
            list.push(target)?;
            list.synthetic += 1;
            list.coupling.mark(reg);
        }

        Ok(list)
    }

    /// Postprocess then filter.
    fn finish(&self, record: &RawRecord, entry: &mut Entry) {
        for step in self.pipeline.postprocessors {
            step.postprocess(record, entry);
        }
        self.pipeline.filter.apply(entry);
    }

    fn learn_tasks(&self, record: &RawRecord) {
        self.tasks.register(record.pid);

        match record.event_kind() {
            Some(EventKind::SchedSwitch) => {
                if let Some(comm) = record.field_str("prev_comm") {
                    self.tasks.set_comm(record.pid, &comm);
                }
                if let (Some(pid), Some(comm)) = (
                    record.field_i64("next_pid").and_then(|p| i32::try_from(p).ok()),
                    record.field_str("next_comm"),
                ) {
                    self.tasks.set_comm(pid, &comm);
                }
            }
            Some(EventKind::SchedWaking | EventKind::SchedWakeup | EventKind::SchedWakeupNew) => {
                if let (Some(pid), Some(comm)) = (
                    record.field_i64("pid").and_then(|p| i32::try_from(p).ok()),
                    record.field_str("comm"),
                ) {
                    self.tasks.set_comm(pid, &comm);
                }
            }
            _ => {}
        }
    }
}
