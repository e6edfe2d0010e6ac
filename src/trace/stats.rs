use std::sync::atomic::{AtomicU64, Ordering};

use super::event::{EventKind, MAX_EVENT_KIND};

/// Lock-free per-EventKind counters filled during acquisition.
///
/// Records of kinds unknown to [`EventKind`] land in a shared `unknown`
/// counter. `snapshot()` reads and resets all counters, so each load starts
/// from zero.
pub struct KindStats {
    counts: [AtomicU64; MAX_EVENT_KIND + 1],
    unknown: AtomicU64,
}

impl KindStats {
    /// Create a new zeroed KindStats.
    pub fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
            unknown: AtomicU64::new(0),
        }
    }

    /// Increment the counter for the given raw kind by one.
    pub fn record(&self, raw_kind: u16) {
        match self.counts.get(usize::from(raw_kind)) {
            Some(counter) if EventKind::from_u16(raw_kind).is_some() => {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.unknown.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Read and reset all counters, returning non-zero known kinds and the
    /// unknown-kind count.
    pub fn snapshot(&self) -> (Vec<(EventKind, u64)>, u64) {
        let mut result = Vec::new();

        for (i, counter) in self.counts.iter().enumerate() {
            let v = counter.swap(0, Ordering::Relaxed);
            if v > 0 {
                if let Some(kind) = u16::try_from(i).ok().and_then(EventKind::from_u16) {
                    result.push((kind, v));
                }
            }
        }

        (result, self.unknown.swap(0, Ordering::Relaxed))
    }
}

impl Default for KindStats {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KindStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindStats").finish_non_exhaustive()
    }
}
