//! A loaded trace: the merged entry array plus everything the view layer
//! asks about it.

pub mod info;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::couple::{self, CouplingState};
use crate::entry::{Backing, Entry, EntryColumns};
use crate::filter::{ClockCalibration, EntryFilter, Postprocess};
use crate::load::{self, LoadError, LoadSummary, Pipeline};
use crate::tasks::TaskTable;
use crate::trace::event::{EventKind, RawRecord, OVERFLOW_EVENT_ID, OVERFLOW_EVENT_NAME};
use crate::trace::file::FileSource;
use crate::trace::RecordSource;

use self::info::FieldValue;

/// Errors from per-entry lookups.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("unknown event id {id}")]
    UnknownEvent { id: i32 },

    #[error("entry is not synthetic")]
    NotSynthetic,

    #[error("entry index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },
}

/// Per-stream load settings.
#[derive(Debug, Clone, Default)]
pub struct StreamSettings {
    pub coupling: bool,
    pub parallel: bool,
    pub clock_offset_ns: i64,
    pub filter: EntryFilter,
}

impl StreamSettings {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self {
            coupling: cfg.coupling.enabled,
            parallel: cfg.load.parallel,
            clock_offset_ns: cfg.calibration.clock_offset_ns,
            filter: EntryFilter::from_config(&cfg.filters).context("building entry filter")?,
        })
    }
}

/// One trace source and its loaded entries.
///
/// `load()` replaces all loaded state. Lookups take `&self` and may run from
/// several threads at once; re-reads of the backing source are serialized by
/// the source.
pub struct TraceStream {
    source: Arc<dyn RecordSource>,
    settings: StreamSettings,
    postprocessors: Vec<Arc<dyn Postprocess>>,

    entries: Vec<Entry>,
    coupling: CouplingState,
    idle_cpus: BTreeSet<usize>,
    tasks: TaskTable,
    summary: Option<LoadSummary>,
}

impl std::fmt::Debug for TraceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceStream")
            .field("settings", &self.settings)
            .field("entries", &self.entries.len())
            .field("coupling", &self.coupling)
            .field("idle_cpus", &self.idle_cpus)
            .finish_non_exhaustive()
    }
}

impl TraceStream {
    /// Wrap a source. Nothing is read until [`TraceStream::load`].
    pub fn new(source: Arc<dyn RecordSource>, settings: StreamSettings) -> Self {
        let calibration: Arc<dyn Postprocess> =
            Arc::new(ClockCalibration::new(settings.clock_offset_ns));

        Self {
            source,
            settings,
            postprocessors: vec![calibration],
            entries: Vec::new(),
            coupling: CouplingState::default(),
            idle_cpus: BTreeSet::new(),
            tasks: TaskTable::new(),
            summary: None,
        }
    }

    /// Open a trace file with settings taken from `cfg`.
    pub fn open(path: impl AsRef<Path>, cfg: &Config) -> Result<Self> {
        let path = path.as_ref();
        let source = FileSource::open(path)
            .with_context(|| format!("opening trace file {}", path.display()))?;
        let settings = StreamSettings::from_config(cfg)?;
        Ok(Self::new(Arc::new(source), settings))
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Takes effect on the next load.
    pub fn set_coupling_enabled(&mut self, enabled: bool) {
        self.settings.coupling = enabled;
    }

    pub fn coupling_enabled(&self) -> bool {
        self.settings.coupling
    }

    /// Register a postprocess step, run after the ones already registered.
    /// Takes effect on the next load.
    pub fn add_postprocessor(&mut self, step: Arc<dyn Postprocess>) {
        debug!(name = step.name(), "postprocessor registered");
        self.postprocessors.push(step);
    }

    /// Load (or reload) every entry of the source.
    ///
    /// On failure the stream is left with zero entries.
    pub fn load(&mut self) -> Result<&[Entry], LoadError> {
        self.reset();

        let pipeline = Pipeline {
            coupling: self.settings.coupling,
            parallel: self.settings.parallel,
            filter: &self.settings.filter,
            postprocessors: &self.postprocessors,
        };

        let loaded = match load::run(self.source.as_ref(), &pipeline, &self.tasks) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "trace load failed");
                self.tasks.clear();
                return Err(e);
            }
        };

        let summary = loaded.summary;
        info!(
            cpus = summary.cpus,
            records = summary.records,
            entries = summary.entries,
            synthetic = summary.synthetic,
            overflow = summary.overflow,
            corrected = summary.corrected,
            idle_cpus = summary.idle_cpus,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "trace loaded"
        );
        for (kind, count) in &summary.per_kind {
            debug!(event = kind.as_str(), count, "records by kind");
        }
        if summary.unknown_kinds > 0 {
            debug!(count = summary.unknown_kinds, "records of unknown kind");
        }

        self.entries = loaded.entries;
        self.coupling = loaded.coupling;
        self.idle_cpus = loaded.idle_cpus;
        self.summary = Some(summary);

        Ok(&self.entries)
    }

    fn reset(&mut self) {
        self.entries = Vec::new();
        self.coupling = CouplingState::default();
        self.idle_cpus.clear();
        self.tasks.clear();
        self.summary = None;
    }

    /// Release the backing source and drop all loaded state. Later lookups
    /// that need the source return empty strings and `load` fails.
    pub fn close(&mut self) {
        self.reset();
        self.source.close();
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Result<&Entry, LookupError> {
        self.entries.get(index).ok_or(LookupError::OutOfRange {
            index,
            len: self.entries.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cpu_count(&self) -> usize {
        self.source.cpu_count()
    }

    /// CPUs that produced no entries in the last load.
    pub fn idle_cpus(&self) -> &BTreeSet<usize> {
        &self.idle_cpus
    }

    pub fn summary(&self) -> Option<&LoadSummary> {
        self.summary.as_ref()
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    pub fn columns(&self) -> EntryColumns {
        EntryColumns::from_entries(&self.entries)
    }

    /// Index of the first entry at or after `timestamp`, or `None` if every
    /// entry is earlier.
    pub fn find_entry_by_time(&self, timestamp: u64) -> Option<usize> {
        let index = self.entries.partition_point(|e| e.timestamp < timestamp);
        (index < self.entries.len()).then_some(index)
    }

    // --- Coupling queries ---

    pub fn coupling_state(&self) -> CouplingState {
        self.coupling
    }

    /// Synthetic ids produced by the last load, in registry order.
    pub fn present_coupled_kinds(&self) -> Vec<i32> {
        self.coupling.present_kinds()
    }

    pub fn is_coupled_kind(&self, event_id: i32) -> bool {
        couple::is_coupled_kind(event_id)
    }

    pub fn synthetic_name(&self, event_id: i32) -> Option<String> {
        couple::synthetic_name(event_id)
    }

    /// The origin entry of a synthetic entry.
    pub fn origin_of(&self, entry: &Entry) -> Result<&Entry, LookupError> {
        let origin = entry.origin_index().ok_or(LookupError::NotSynthetic)?;
        self.entry(origin)
    }

    /// The entry that holds `entry`'s record data: the origin for synthetic
    /// entries, the entry itself otherwise.
    fn data_entry<'a>(&'a self, entry: &'a Entry) -> &'a Entry {
        match entry.backing {
            Backing::Synthetic { .. } => self.origin_of(entry).unwrap_or(entry),
            _ => entry,
        }
    }

    // --- Per-entry accessors ---

    pub fn event_name(&self, entry: &Entry) -> Result<String, LookupError> {
        if entry.event_id == OVERFLOW_EVENT_ID {
            return Ok(OVERFLOW_EVENT_NAME.to_string());
        }
        if let Some(name) = couple::synthetic_name(entry.event_id) {
            return Ok(name);
        }
        EventKind::from_id(entry.event_id)
            .map(|kind| kind.as_str().to_string())
            .ok_or(LookupError::UnknownEvent {
                id: entry.event_id,
            })
    }

    /// Name of the task that owns `entry`.
    pub fn task_name(&self, entry: &Entry) -> String {
        self.tasks.name(entry.pid)
    }

    /// Re-read the raw record behind `entry`, following synthetic entries to
    /// their origin. Read failures are logged and yield `None`.
    pub fn record(&self, entry: &Entry) -> Option<RawRecord> {
        let offset = self.data_entry(entry).record_offset()?;
        match self.source.read_at(offset) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(offset, error = %e, "re-reading trace record failed");
                None
            }
        }
    }

    pub fn info(&self, entry: &Entry) -> String {
        if let Backing::Missed { count } = entry.backing {
            return format!("[LOST {count} EVENTS]");
        }
        self.record(entry)
            .map(|r| info::format_info(&r))
            .unwrap_or_default()
    }

    pub fn latency(&self, entry: &Entry) -> String {
        self.record(entry)
            .map(|r| info::format_latency(&r))
            .unwrap_or_default()
    }

    /// Payload field `name` of the record behind `entry`.
    pub fn field_value(&self, entry: &Entry, name: &str) -> Option<FieldValue> {
        self.record(entry).and_then(|r| info::field_value(&r, name))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::couple::{SWITCH_TARGET_EVENT_ID, WAKEUP_TARGET_EVENT_ID};
    use crate::entry::Visibility;
    use crate::trace::memory::MemorySource;
    use crate::trace::parse::ParseError;
    use crate::trace::write::TraceWriter;

    fn stream(writer: &TraceWriter, coupling: bool) -> TraceStream {
        let source = MemorySource::from_bytes(writer.encode()).unwrap();
        let settings = StreamSettings {
            coupling,
            ..Default::default()
        };
        TraceStream::new(Arc::new(source), settings)
    }

    fn sample() -> TraceWriter {
        let mut writer = TraceWriter::new(2);
        writer.sched_waking(0, 100, 1, 50, 1, "sleeper");
        writer.sched_switch(1, 200, 0, 50, "swapper", "sleeper");
        writer.sys_enter(1, 300, 50, 4).missed = 2;
        writer
    }

    #[test]
    fn test_load_and_names() {
        let mut s = stream(&sample(), true);
        let entries = s.load().unwrap().to_vec();

        // waking, waking[target], switch, switch[target], overflow, sys_enter
        assert_eq!(entries.len(), 6);
        let names: Vec<String> = entries.iter().map(|e| s.event_name(e).unwrap()).collect();
        assert_eq!(
            names,
            vec![
                "sched_waking",
                "sched_waking[target]",
                "sched_switch",
                "sched_switch[target]",
                "missed_events",
                "sys_enter"
            ]
        );
        assert_eq!(s.task_name(&entries[1]), "sleeper");
        assert_eq!(s.task_name(&entries[2]), "<idle>");
        assert_eq!(
            s.present_coupled_kinds(),
            vec![SWITCH_TARGET_EVENT_ID, WAKEUP_TARGET_EVENT_ID]
        );
        assert_eq!(s.summary().unwrap().corrected, 1);
    }

    #[test]
    fn test_synthetic_lookups_follow_origin() {
        let mut s = stream(&sample(), true);
        s.load().unwrap();
        let target = s.entries()[1];
        assert!(target.is_synthetic());

        let origin = s.origin_of(&target).unwrap();
        assert_eq!(origin.event_id, EventKind::SchedWaking.id());
        assert_eq!(s.info(&target), s.info(origin));
        assert_eq!(s.latency(&target), "....");
        assert_eq!(
            s.field_value(&target, "pid"),
            Some(FieldValue::Int(50))
        );

        assert_eq!(s.origin_of(origin), Err(LookupError::NotSynthetic));
    }

    #[test]
    fn test_overflow_info() {
        let mut s = stream(&sample(), false);
        s.load().unwrap();
        let lost = s
            .entries()
            .iter()
            .find(|e| e.event_id == OVERFLOW_EVENT_ID)
            .copied()
            .unwrap();
        assert_eq!(s.info(&lost), "[LOST 2 EVENTS]");
        assert_eq!(s.latency(&lost), "");
        assert_eq!(s.field_value(&lost, "id"), None);
    }

    #[test]
    fn test_unknown_event_name() {
        let mut writer = TraceWriter::new(1);
        writer.record(0, 5, 1, 200, vec![1, 2, 3]);
        let mut s = stream(&writer, false);
        s.load().unwrap();
        let e = s.entries()[0];
        assert_eq!(
            s.event_name(&e),
            Err(LookupError::UnknownEvent { id: 200 })
        );
        assert_eq!(s.info(&e), "");
    }

    #[test]
    fn test_find_entry_by_time() {
        let mut s = stream(&sample(), false);
        s.load().unwrap();
        // waking@100, switch@200, overflow@290, sys_enter@300
        assert_eq!(s.find_entry_by_time(0), Some(0));
        assert_eq!(s.find_entry_by_time(100), Some(0));
        assert_eq!(s.find_entry_by_time(101), Some(1));
        assert_eq!(s.find_entry_by_time(291), Some(3));
        assert_eq!(s.find_entry_by_time(301), None);
    }

    #[test]
    fn test_reload_resets_state() {
        let mut s = stream(&sample(), true);
        s.load().unwrap();
        assert_eq!(s.coupling_state().count(), 2);

        s.set_coupling_enabled(false);
        let len = s.load().unwrap().len();
        assert_eq!(len, 4);
        assert_eq!(s.coupling_state().count(), 0);
        assert!(s.present_coupled_kinds().is_empty());
    }

    #[test]
    fn test_close_drops_entries() {
        let mut s = stream(&sample(), true);
        let e = s.load().unwrap()[0];
        s.close();
        assert!(s.is_empty());
        assert_eq!(s.info(&e), "");
        assert!(s.entry(0).is_err());

        assert!(matches!(
            s.load().unwrap_err(),
            LoadError::Source {
                cpu: 0,
                source: ParseError::Closed
            }
        ));
        assert!(s.is_empty());
    }

    #[test]
    fn test_added_postprocessor_runs_after_calibration() {
        struct HideIdle;
        impl Postprocess for HideIdle {
            fn name(&self) -> &str {
                "hide_idle"
            }
            fn postprocess(&self, _record: &RawRecord, entry: &mut Entry) {
                if entry.pid == 0 {
                    entry.visible.remove(Visibility::GRAPH_VIEW);
                }
            }
        }

        let mut s = stream(&sample(), false);
        s.add_postprocessor(Arc::new(HideIdle));
        s.load().unwrap();
        let switch = s
            .entries()
            .iter()
            .find(|e| e.event_id == EventKind::SchedSwitch.id())
            .copied()
            .unwrap();
        assert!(!switch.graph_visible());
    }

    #[test]
    fn test_concurrent_lookups() {
        let mut writer = TraceWriter::new(2);
        for i in 0..100u64 {
            writer.print((i % 2) as usize, i, 1, &format!("line {i}"));
        }
        let mut s = stream(&writer, false);
        s.load().unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let s = &s;
                scope.spawn(move || {
                    for (i, e) in s.entries().iter().enumerate() {
                        assert_eq!(s.info(e), format!("line {i}"));
                    }
                });
            }
        });
    }
}
