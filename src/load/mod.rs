//! The loading pipeline: per-CPU acquisition, time merge and wake-up CPU
//! correction.

pub mod acquire;
pub mod correct;
pub mod merge;

use std::collections::{BTreeSet, TryReserveError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::couple::{CoupledKind, CouplingState};
use crate::entry::Entry;
use crate::filter::{EntryFilter, Postprocess};
use crate::tasks::TaskTable;
use crate::trace::event::EventKind;
use crate::trace::parse::ParseError;
use crate::trace::stats::KindStats;
use crate::trace::RecordSource;

/// Errors that abort a load. A failed load produces no entries.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to allocate {stage}")]
    Alloc {
        stage: &'static str,
        #[source]
        source: TryReserveError,
    },

    #[error("reading cpu {cpu}")]
    Source {
        cpu: usize,
        #[source]
        source: ParseError,
    },

    #[error("synthetic entry on cpu {cpu} refers to unknown origin {index}")]
    DanglingOrigin { cpu: usize, index: usize },
}

impl LoadError {
    pub(crate) fn alloc(stage: &'static str) -> impl FnOnce(TryReserveError) -> Self {
        move |source| Self::Alloc { stage, source }
    }
}

/// Per-load knobs and hooks shared by every acquisition worker.
pub struct Pipeline<'a> {
    pub coupling: bool,
    pub parallel: bool,
    pub filter: &'a EntryFilter,
    pub postprocessors: &'a [Arc<dyn Postprocess>],
}

/// Counters describing one completed load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub cpus: usize,
    /// Raw records read.
    pub records: u64,
    /// Entries in the merged array.
    pub entries: usize,
    pub synthetic: u64,
    /// Overflow entries injected.
    pub overflow: u64,
    /// Sum of the dropped-record counts reported by the producer.
    pub missed_records: u64,
    /// Wake-up targets whose CPU was resolved from a later switch-in.
    pub corrected: usize,
    pub idle_cpus: usize,
    pub per_kind: Vec<(EventKind, u64)>,
    pub unknown_kinds: u64,
    pub elapsed: Duration,
}

/// Output of a successful load.
#[derive(Debug)]
pub struct Loaded {
    pub entries: Vec<Entry>,
    pub coupling: CouplingState,
    pub idle_cpus: BTreeSet<usize>,
    pub summary: LoadSummary,
}

/// Run the whole pipeline over `source`, registering tasks in `tasks`.
///
/// On error every intermediate list is dropped before returning.
pub fn run(
    source: &dyn RecordSource,
    pipeline: &Pipeline<'_>,
    tasks: &TaskTable,
) -> Result<Loaded, LoadError> {
    let start = Instant::now();
    let stats = KindStats::new();

    let cpu_lists = acquire::acquire_all(source, pipeline, tasks, &stats)?;

    let mut summary = LoadSummary {
        cpus: cpu_lists.len(),
        ..Default::default()
    };
    let mut coupling = CouplingState::default();
    let mut idle_cpus = BTreeSet::new();
    let mut lists = Vec::with_capacity(cpu_lists.len());

    for list in cpu_lists {
        debug!(
            cpu = list.cpu,
            records = list.records,
            entries = list.entries.len(),
            synthetic = list.synthetic,
            "cpu acquired"
        );

        coupling.absorb(list.coupling);
        if list.entries.is_empty() {
            idle_cpus.insert(list.cpu);
        }
        summary.records += list.records;
        summary.synthetic += list.synthetic;
        summary.overflow += list.overflow;
        summary.missed_records += list.missed;
        lists.push(list.entries);
    }

    let mut entries = merge::merge_lists(lists)?;

    if pipeline.coupling && coupling.has(CoupledKind::WakeupTarget) {
        summary.corrected = correct::correct_wakeup_cpus(&mut entries);
    }

    let (per_kind, unknown_kinds) = stats.snapshot();
    summary.entries = entries.len();
    summary.idle_cpus = idle_cpus.len();
    summary.per_kind = per_kind;
    summary.unknown_kinds = unknown_kinds;
    summary.elapsed = start.elapsed();

    Ok(Loaded {
        entries,
        coupling,
        idle_cpus,
        summary,
    })
}
