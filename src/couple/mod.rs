//! Coupled events: kernel events that involve two tasks but are recorded
//! from one side only.
//!
//! When coupling is enabled for a stream, every origin record of a registered
//! kind gets a synthetic "target" twin attributed to the other task. The
//! static [`REGISTRY`] maps each origin kind to its flag, its reserved
//! negative event id and its display name.

pub mod synth;

use crate::trace::event::EventKind;

/// Event id of the synthetic entry that follows every `sched_switch`.
pub const SWITCH_TARGET_EVENT_ID: i32 = -10;

/// Event id of the synthetic entry that follows every `sched_waking`.
pub const WAKEUP_TARGET_EVENT_ID: i32 = -11;

/// Appended to the origin event name to form the synthetic name.
pub const TARGET_SUFFIX: &str = "[target]";

/// Which side of the coupling the synthetic entry models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoupledKind {
    /// The task being switched in.
    SwitchTarget,
    /// The task being woken.
    WakeupTarget,
}

bitflags::bitflags! {
    /// Set of coupled kinds, one flag per registry entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CoupledKinds: u32 {
        const SWITCH_TARGET = 1 << 0;
        const WAKEUP_TARGET = 1 << 1;
    }
}

impl Default for CoupledKinds {
    fn default() -> Self {
        Self::empty()
    }
}

/// One entry of the static coupling registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub origin: EventKind,
    pub kind: CoupledKind,
    /// Flag recorded in [`CouplingState`].
    pub flag: CoupledKinds,
    pub synthetic_id: i32,
}

impl Registration {
    /// Display name of the synthetic entries, e.g. `sched_switch[target]`.
    pub fn synthetic_name(&self) -> String {
        format!("{}{}", self.origin.as_str(), TARGET_SUFFIX)
    }
}

/// Registered coupled kinds.
pub const REGISTRY: &[Registration] = &[
    Registration {
        origin: EventKind::SchedSwitch,
        kind: CoupledKind::SwitchTarget,
        flag: CoupledKinds::SWITCH_TARGET,
        synthetic_id: SWITCH_TARGET_EVENT_ID,
    },
    Registration {
        origin: EventKind::SchedWaking,
        kind: CoupledKind::WakeupTarget,
        flag: CoupledKinds::WAKEUP_TARGET,
        synthetic_id: WAKEUP_TARGET_EVENT_ID,
    },
];

/// Registration whose origin kind is `event_id`.
pub fn registration_for_origin(event_id: i32) -> Option<&'static Registration> {
    REGISTRY.iter().find(|r| r.origin.id() == event_id)
}

/// Registration whose synthetic id is `event_id`.
pub fn registration_for_synthetic(event_id: i32) -> Option<&'static Registration> {
    REGISTRY.iter().find(|r| r.synthetic_id == event_id)
}

/// True if `event_id` is a registered origin kind or one of the synthetic ids.
pub fn is_coupled_kind(event_id: i32) -> bool {
    registration_for_origin(event_id).is_some() || registration_for_synthetic(event_id).is_some()
}

/// True if `event_id` is one of the synthetic ids.
pub fn is_synthetic_kind(event_id: i32) -> bool {
    registration_for_synthetic(event_id).is_some()
}

/// Display name for a synthetic id.
pub fn synthetic_name(event_id: i32) -> Option<String> {
    registration_for_synthetic(event_id).map(Registration::synthetic_name)
}

/// Synthetic id with the given display name.
pub fn synthetic_id_from_name(name: &str) -> Option<i32> {
    let origin = name.strip_suffix(TARGET_SUFFIX)?;
    REGISTRY
        .iter()
        .find(|r| r.origin.as_str() == origin)
        .map(|r| r.synthetic_id)
}

/// Which coupled kinds a stream's last load actually produced.
///
/// Reset by value at the start of every load and only written during
/// acquisition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CouplingState {
    encountered: CoupledKinds,
    count: u32,
}

impl CouplingState {
    /// Record that `reg` was seen. Returns true the first time.
    pub fn mark(&mut self, reg: &Registration) -> bool {
        if self.encountered.contains(reg.flag) {
            return false;
        }
        self.encountered.insert(reg.flag);
        self.count += 1;
        true
    }

    /// Fold in the state gathered by another acquisition worker.
    pub fn absorb(&mut self, other: CouplingState) {
        for reg in REGISTRY {
            if other.encountered.contains(reg.flag) {
                self.mark(reg);
            }
        }
    }

    pub fn encountered(&self) -> CoupledKinds {
        self.encountered
    }

    /// Number of distinct coupled kinds encountered.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn has(&self, kind: CoupledKind) -> bool {
        REGISTRY
            .iter()
            .any(|r| r.kind == kind && self.encountered.contains(r.flag))
    }

    /// Synthetic ids present in the stream, in registry order.
    pub fn present_kinds(&self) -> Vec<i32> {
        REGISTRY
            .iter()
            .filter(|r| self.encountered.contains(r.flag))
            .map(|r| r.synthetic_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_consistent() {
        let mut seen = CoupledKinds::empty();
        for reg in REGISTRY {
            assert!(reg.synthetic_id < 0);
            assert_eq!(reg.flag.bits().count_ones(), 1);
            assert!(!seen.intersects(reg.flag));
            seen.insert(reg.flag);
            assert_eq!(registration_for_origin(reg.origin.id()), Some(reg));
            assert_eq!(registration_for_synthetic(reg.synthetic_id), Some(reg));
        }
        assert!(registration_for_origin(EventKind::Print.id()).is_none());
    }

    #[test]
    fn test_is_coupled_kind() {
        assert!(is_coupled_kind(EventKind::SchedSwitch.id()));
        assert!(is_coupled_kind(EventKind::SchedWaking.id()));
        assert!(is_coupled_kind(SWITCH_TARGET_EVENT_ID));
        assert!(is_coupled_kind(WAKEUP_TARGET_EVENT_ID));
        assert!(!is_coupled_kind(EventKind::SchedWakeup.id()));
        assert!(!is_coupled_kind(-5));

        assert!(is_synthetic_kind(WAKEUP_TARGET_EVENT_ID));
        assert!(!is_synthetic_kind(EventKind::SchedSwitch.id()));
    }

    #[test]
    fn test_synthetic_names() {
        assert_eq!(
            synthetic_name(SWITCH_TARGET_EVENT_ID).as_deref(),
            Some("sched_switch[target]")
        );
        assert_eq!(
            synthetic_name(WAKEUP_TARGET_EVENT_ID).as_deref(),
            Some("sched_waking[target]")
        );
        assert_eq!(synthetic_name(EventKind::SchedSwitch.id()), None);

        assert_eq!(
            synthetic_id_from_name("sched_waking[target]"),
            Some(WAKEUP_TARGET_EVENT_ID)
        );
        assert_eq!(synthetic_id_from_name("sched_wakeup[target]"), None);
        assert_eq!(synthetic_id_from_name("sched_switch"), None);
    }

    #[test]
    fn test_state_counts_each_kind_once() {
        let mut state = CouplingState::default();
        let switch = &REGISTRY[0];

        assert!(state.mark(switch));
        assert!(!state.mark(switch));
        assert_eq!(state.count(), 1);
        assert!(state.has(CoupledKind::SwitchTarget));
        assert!(!state.has(CoupledKind::WakeupTarget));
        assert_eq!(state.present_kinds(), vec![SWITCH_TARGET_EVENT_ID]);
    }

    #[test]
    fn test_absorb() {
        let mut a = CouplingState::default();
        let mut b = CouplingState::default();
        a.mark(&REGISTRY[0]);
        b.mark(&REGISTRY[0]);
        b.mark(&REGISTRY[1]);

        a.absorb(b);
        assert_eq!(a.count(), 2);
        assert_eq!(a.encountered(), CoupledKinds::all());
        assert_eq!(
            a.present_kinds(),
            vec![SWITCH_TARGET_EVENT_ID, WAKEUP_TARGET_EVENT_ID]
        );
    }
}
