//! Normalized trace entries, the unit handed to the view layer.

bitflags::bitflags! {
    /// Visibility bitmask of an entry.
    ///
    /// A cleared view bit hides the entry from that view. `PLUGIN_UNTOUCHED`
    /// stays set until some post-processing step alters the entry's task or CPU
    /// attribution.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Visibility: u8 {
        const GRAPH_VIEW = 1 << 0;
        const TEXT_VIEW = 1 << 1;
        const EVENT_VIEW = 1 << 2;
        const PLUGIN_UNTOUCHED = 1 << 7;
        /// Fully visible and untouched.
        const ALL = 0xFF;
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Self::ALL
    }
}

/// Where an entry's remaining data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backing {
    /// Header offset of the raw record in the backing source.
    Record { offset: u64 },
    /// Index of the origin entry. During acquisition this indexes the
    /// per-CPU list; after the merge it indexes the loaded entry array.
    Synthetic { origin: usize },
    /// Number of records the producer dropped.
    Missed { count: u32 },
}

/// One normalized trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub timestamp: u64,
    pub cpu: i32,
    pub pid: i32,
    pub event_id: i32,
    pub visible: Visibility,
    pub backing: Backing,
}

impl Entry {
    /// True for entries created by the coupled-event synthesizer.
    pub fn is_synthetic(&self) -> bool {
        matches!(self.backing, Backing::Synthetic { .. })
    }

    /// Raw record offset, for entries that have one.
    pub fn record_offset(&self) -> Option<u64> {
        match self.backing {
            Backing::Record { offset } => Some(offset),
            _ => None,
        }
    }

    /// Origin index, for synthetic entries.
    pub fn origin_index(&self) -> Option<usize> {
        match self.backing {
            Backing::Synthetic { origin } => Some(origin),
            _ => None,
        }
    }

    /// Shown in the graph view.
    pub fn graph_visible(&self) -> bool {
        self.visible.contains(Visibility::GRAPH_VIEW)
    }

    /// Shown in the text (list) view.
    pub fn text_visible(&self) -> bool {
        self.visible.contains(Visibility::TEXT_VIEW)
    }
}

/// Column-oriented copy of a loaded entry array.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryColumns {
    pub timestamp: Vec<u64>,
    pub cpu: Vec<i32>,
    pub pid: Vec<i32>,
    pub event_id: Vec<i32>,
    /// Record offset, or `None` for synthetic and overflow entries.
    pub offset: Vec<Option<u64>>,
}

impl EntryColumns {
    pub fn from_entries(entries: &[Entry]) -> Self {
        let mut cols = Self {
            timestamp: Vec::with_capacity(entries.len()),
            cpu: Vec::with_capacity(entries.len()),
            pid: Vec::with_capacity(entries.len()),
            event_id: Vec::with_capacity(entries.len()),
            offset: Vec::with_capacity(entries.len()),
        };
        for e in entries {
            cols.timestamp.push(e.timestamp);
            cols.cpu.push(e.cpu);
            cols.pid.push(e.pid);
            cols.event_id.push(e.event_id);
            cols.offset.push(e.record_offset());
        }
        cols
    }

    pub fn len(&self) -> usize {
        self.timestamp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(backing: Backing) -> Entry {
        Entry {
            timestamp: 10,
            cpu: 1,
            pid: 2,
            event_id: 3,
            visible: Visibility::ALL,
            backing,
        }
    }

    #[test]
    fn test_visibility_bits() {
        let mut v = Visibility::ALL;
        assert!(v.contains(Visibility::PLUGIN_UNTOUCHED));

        v.remove(Visibility::TEXT_VIEW | Visibility::GRAPH_VIEW);
        assert!(!v.contains(Visibility::TEXT_VIEW));
        assert!(!v.contains(Visibility::GRAPH_VIEW));
        assert!(v.contains(Visibility::EVENT_VIEW));
        assert_eq!(v.bits(), 0xFC);

        v.insert(Visibility::TEXT_VIEW);
        assert_eq!(v & Visibility::TEXT_VIEW, Visibility::TEXT_VIEW);
        assert_eq!(!Visibility::ALL, Visibility::empty());
        assert_eq!(Visibility::default(), Visibility::ALL);
    }

    #[test]
    fn test_backing_accessors() {
        let ordinary = entry(Backing::Record { offset: 64 });
        assert_eq!(ordinary.record_offset(), Some(64));
        assert!(!ordinary.is_synthetic());

        let synthetic = entry(Backing::Synthetic { origin: 4 });
        assert!(synthetic.is_synthetic());
        assert_eq!(synthetic.origin_index(), Some(4));
        assert_eq!(synthetic.record_offset(), None);

        let missed = entry(Backing::Missed { count: 9 });
        assert_eq!(missed.origin_index(), None);
        assert_eq!(missed.record_offset(), None);
    }

    #[test]
    fn test_columns() {
        let entries = [
            entry(Backing::Record { offset: 64 }),
            entry(Backing::Synthetic { origin: 0 }),
        ];
        let cols = EntryColumns::from_entries(&entries);
        assert_eq!(cols.len(), 2);
        assert_eq!(cols.offset, vec![Some(64), None]);
        assert_eq!(cols.timestamp, vec![10, 10]);
    }
}
