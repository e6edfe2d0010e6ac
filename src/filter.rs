//! Per-entry hooks run during acquisition: postprocess steps that may adjust
//! an entry, and the visibility filter.

use std::collections::HashSet;

use anyhow::Result;

use crate::config::{resolve_event_names, FiltersConfig};
use crate::entry::{Entry, Visibility};
use crate::trace::event::RawRecord;

/// A step run on every freshly materialized entry, ordinary or synthetic,
/// before filtering.
///
/// Implementations may adjust the timestamp, task or CPU. A step that changes
/// task or CPU attribution should clear [`Visibility::PLUGIN_UNTOUCHED`].
pub trait Postprocess: Send + Sync {
    fn name(&self) -> &str;

    fn postprocess(&self, record: &RawRecord, entry: &mut Entry);
}

/// Shifts every timestamp by a fixed signed offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockCalibration {
    offset_ns: i64,
}

impl ClockCalibration {
    pub fn new(offset_ns: i64) -> Self {
        Self { offset_ns }
    }

    pub fn offset_ns(&self) -> i64 {
        self.offset_ns
    }

    pub fn is_identity(&self) -> bool {
        self.offset_ns == 0
    }
}

impl Postprocess for ClockCalibration {
    fn name(&self) -> &str {
        "clock_calibration"
    }

    fn postprocess(&self, _record: &RawRecord, entry: &mut Entry) {
        entry.timestamp = entry.timestamp.saturating_add_signed(self.offset_ns);
    }
}

/// Show or hide set for one filter dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Rule {
    #[default]
    Any,
    Show(HashSet<i32>),
    Hide(HashSet<i32>),
}

impl Rule {
    fn new(show: HashSet<i32>, hide: HashSet<i32>) -> Self {
        if !show.is_empty() {
            Self::Show(show)
        } else if !hide.is_empty() {
            Self::Hide(hide)
        } else {
            Self::Any
        }
    }

    fn passes(&self, value: i32) -> bool {
        match self {
            Self::Any => true,
            Self::Show(set) => set.contains(&value),
            Self::Hide(set) => !set.contains(&value),
        }
    }
}

/// Visibility filter over task, event and CPU.
///
/// Task and CPU rules clear the text and graph bits; event rules clear the
/// text and event bits. The filter never touches `PLUGIN_UNTOUCHED`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    tasks: Rule,
    events: Rule,
    cpus: Rule,
}

impl EntryFilter {
    /// Build a filter from configuration. Event names must be known.
    pub fn from_config(cfg: &FiltersConfig) -> Result<Self> {
        Ok(Self {
            tasks: Rule::new(
                cfg.show_tasks.iter().copied().collect(),
                cfg.hide_tasks.iter().copied().collect(),
            ),
            events: Rule::new(
                resolve_event_names(&cfg.show_events)?,
                resolve_event_names(&cfg.hide_events)?,
            ),
            cpus: Rule::new(
                cfg.show_cpus.iter().copied().collect(),
                cfg.hide_cpus.iter().copied().collect(),
            ),
        })
    }

    /// Filter that lets everything through.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks == Rule::Any && self.events == Rule::Any && self.cpus == Rule::Any
    }

    pub fn show_tasks(mut self, pids: impl IntoIterator<Item = i32>) -> Self {
        self.tasks = Rule::Show(pids.into_iter().collect());
        self
    }

    pub fn hide_tasks(mut self, pids: impl IntoIterator<Item = i32>) -> Self {
        self.tasks = Rule::Hide(pids.into_iter().collect());
        self
    }

    pub fn show_events(mut self, ids: impl IntoIterator<Item = i32>) -> Self {
        self.events = Rule::Show(ids.into_iter().collect());
        self
    }

    pub fn hide_events(mut self, ids: impl IntoIterator<Item = i32>) -> Self {
        self.events = Rule::Hide(ids.into_iter().collect());
        self
    }

    pub fn show_cpus(mut self, cpus: impl IntoIterator<Item = i32>) -> Self {
        self.cpus = Rule::Show(cpus.into_iter().collect());
        self
    }

    pub fn hide_cpus(mut self, cpus: impl IntoIterator<Item = i32>) -> Self {
        self.cpus = Rule::Hide(cpus.into_iter().collect());
        self
    }

    /// Clear the view bits of `entry` that its task, event or CPU rule rejects.
    pub fn apply(&self, entry: &mut Entry) {
        if !self.tasks.passes(entry.pid) || !self.cpus.passes(entry.cpu) {
            entry.visible.remove(Visibility::TEXT_VIEW | Visibility::GRAPH_VIEW);
        }
        if !self.events.passes(entry.event_id) {
            entry.visible.remove(Visibility::TEXT_VIEW | Visibility::EVENT_VIEW);
        }
    }
}
