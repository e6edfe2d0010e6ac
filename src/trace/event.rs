use std::fmt;

use super::parse::read_fixed;

/// EventKind identifies the kind of a raw trace record.
/// Values must match the `kind` field written by [`super::write::TraceWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EventKind {
    SchedSwitch = 1,
    SchedWaking = 2,
    SchedWakeup = 3,
    SchedWakeupNew = 4,
    IrqHandlerEntry = 5,
    IrqHandlerExit = 6,
    SysEnter = 7,
    SysExit = 8,
    Print = 9,
}

/// Maximum EventKind value, used for array sizing.
pub const MAX_EVENT_KIND: usize = 9;

/// Event id of the entry injected in front of a record that reports dropped records.
pub const OVERFLOW_EVENT_ID: i32 = -5;

/// Display name of overflow entries.
pub const OVERFLOW_EVENT_NAME: &str = "missed_events";

/// Payload field encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    I32,
    U32,
    I64,
    U64,
    /// NUL-padded string of fixed width.
    Str(usize),
    /// NUL-terminated string running to the end of the payload.
    Tail,
}

/// Location of one named field inside a record payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub offset: usize,
    pub ty: FieldType,
}

impl FieldDef {
    const fn new(name: &'static str, offset: usize, ty: FieldType) -> Self {
        Self { name, offset, ty }
    }

    /// Bytes the payload must hold for this field to be readable.
    pub const fn end(&self) -> usize {
        self.offset
            + match self.ty {
                FieldType::I32 | FieldType::U32 => 4,
                FieldType::I64 | FieldType::U64 => 8,
                FieldType::Str(len) => len,
                FieldType::Tail => 0,
            }
    }

    /// True for fields that decode to an integer.
    pub const fn is_numeric(&self) -> bool {
        !matches!(self.ty, FieldType::Str(_) | FieldType::Tail)
    }
}

/// Width of the `comm` arrays carried by scheduler records.
pub const COMM_LEN: usize = 16;

const SCHED_SWITCH_FIELDS: &[FieldDef] = &[
    FieldDef::new("prev_state", 0, FieldType::U64),
    FieldDef::new("next_pid", 8, FieldType::I32),
    FieldDef::new("next_prio", 12, FieldType::I32),
    FieldDef::new("prev_comm", 16, FieldType::Str(COMM_LEN)),
    FieldDef::new("next_comm", 32, FieldType::Str(COMM_LEN)),
];

const SCHED_WAKE_FIELDS: &[FieldDef] = &[
    FieldDef::new("pid", 0, FieldType::I32),
    FieldDef::new("prio", 4, FieldType::I32),
    FieldDef::new("target_cpu", 8, FieldType::I32),
    FieldDef::new("comm", 16, FieldType::Str(COMM_LEN)),
];

const IRQ_ENTRY_FIELDS: &[FieldDef] = &[
    FieldDef::new("irq", 0, FieldType::I32),
    FieldDef::new("name", 4, FieldType::Str(COMM_LEN)),
];

const IRQ_EXIT_FIELDS: &[FieldDef] = &[
    FieldDef::new("irq", 0, FieldType::I32),
    FieldDef::new("ret", 4, FieldType::I32),
];

const SYS_ENTER_FIELDS: &[FieldDef] = &[FieldDef::new("id", 0, FieldType::I64)];

const SYS_EXIT_FIELDS: &[FieldDef] = &[
    FieldDef::new("id", 0, FieldType::I64),
    FieldDef::new("ret", 8, FieldType::I64),
];

const PRINT_FIELDS: &[FieldDef] = &[
    FieldDef::new("ip", 0, FieldType::U64),
    FieldDef::new("buf", 8, FieldType::Tail),
];

impl EventKind {
    /// Returns the canonical event name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SchedSwitch => "sched_switch",
            Self::SchedWaking => "sched_waking",
            Self::SchedWakeup => "sched_wakeup",
            Self::SchedWakeupNew => "sched_wakeup_new",
            Self::IrqHandlerEntry => "irq_handler_entry",
            Self::IrqHandlerExit => "irq_handler_exit",
            Self::SysEnter => "sys_enter",
            Self::SysExit => "sys_exit",
            Self::Print => "print",
        }
    }

    /// Subsystem the event belongs to.
    pub const fn system(self) -> &'static str {
        match self {
            Self::SchedSwitch | Self::SchedWaking | Self::SchedWakeup | Self::SchedWakeupNew => {
                "sched"
            }
            Self::IrqHandlerEntry | Self::IrqHandlerExit => "irq",
            Self::SysEnter | Self::SysExit => "raw_syscalls",
            Self::Print => "ftrace",
        }
    }

    /// Event id as stored in normalized entries.
    pub const fn id(self) -> i32 {
        self as u16 as i32
    }

    /// Payload field layout.
    pub const fn fields(self) -> &'static [FieldDef] {
        match self {
            Self::SchedSwitch => SCHED_SWITCH_FIELDS,
            Self::SchedWaking | Self::SchedWakeup | Self::SchedWakeupNew => SCHED_WAKE_FIELDS,
            Self::IrqHandlerEntry => IRQ_ENTRY_FIELDS,
            Self::IrqHandlerExit => IRQ_EXIT_FIELDS,
            Self::SysEnter => SYS_ENTER_FIELDS,
            Self::SysExit => SYS_EXIT_FIELDS,
            Self::Print => PRINT_FIELDS,
        }
    }

    /// Look up a payload field by name.
    pub fn field(self, name: &str) -> Option<&'static FieldDef> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// Convert from a raw u16 value.
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(Self::SchedSwitch),
            2 => Some(Self::SchedWaking),
            3 => Some(Self::SchedWakeup),
            4 => Some(Self::SchedWakeupNew),
            5 => Some(Self::IrqHandlerEntry),
            6 => Some(Self::IrqHandlerExit),
            7 => Some(Self::SysEnter),
            8 => Some(Self::SysExit),
            9 => Some(Self::Print),
            _ => None,
        }
    }

    /// Convert from a normalized entry event id. Negative ids never match.
    pub fn from_id(id: i32) -> Option<Self> {
        u16::try_from(id).ok().and_then(Self::from_u16)
    }

    /// Convert from the canonical event name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|k| k.as_str() == name)
    }

    /// Return all event kinds in numeric order.
    pub fn all() -> &'static [Self] {
        &[
            Self::SchedSwitch,
            Self::SchedWaking,
            Self::SchedWakeup,
            Self::SchedWakeupNew,
            Self::IrqHandlerEntry,
            Self::IrqHandlerExit,
            Self::SysEnter,
            Self::SysExit,
            Self::Print,
        ]
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record header flag: interrupts were disabled.
pub const FLAG_IRQS_OFF: u8 = 0x01;
/// Record header flag: a reschedule was pending.
pub const FLAG_NEED_RESCHED: u8 = 0x04;
/// Record header flag: recorded in hard interrupt context.
pub const FLAG_HARDIRQ: u8 = 0x08;
/// Record header flag: recorded in soft interrupt context.
pub const FLAG_SOFTIRQ: u8 = 0x10;

/// One raw record as stored in a per-CPU section of the trace file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub timestamp_ns: u64,
    pub pid: i32,
    /// Raw kind id, possibly unknown to [`EventKind`].
    pub kind: u16,
    /// Records dropped by the producer right before this one.
    pub missed: u32,
    pub flags: u8,
    pub preempt_count: u8,
    /// Byte offset of the record header in the backing file.
    pub offset: u64,
    pub payload: Vec<u8>,
}

impl RawRecord {
    /// The decoded event kind, if known.
    pub fn event_kind(&self) -> Option<EventKind> {
        EventKind::from_u16(self.kind)
    }

    /// Read an integer field by name. `None` if the kind or field is unknown or the
    /// payload is too short to hold it.
    pub fn field_i64(&self, name: &str) -> Option<i64> {
        let def = self.event_kind()?.field(name)?;
        read_numeric(&self.payload, def)
    }

    /// Read a string field by name, trimmed at the first NUL.
    pub fn field_str(&self, name: &str) -> Option<String> {
        let def = self.event_kind()?.field(name)?;
        read_string(&self.payload, def)
    }
}

pub(crate) fn read_numeric(payload: &[u8], def: &FieldDef) -> Option<i64> {
    match def.ty {
        FieldType::I32 => read_fixed::<4>(payload, def.offset).map(|b| i64::from(i32::from_le_bytes(b))),
        FieldType::U32 => read_fixed::<4>(payload, def.offset).map(|b| i64::from(u32::from_le_bytes(b))),
        FieldType::I64 => read_fixed::<8>(payload, def.offset).map(i64::from_le_bytes),
        FieldType::U64 => read_fixed::<8>(payload, def.offset).map(|b| u64::from_le_bytes(b) as i64),
        FieldType::Str(_) | FieldType::Tail => None,
    }
}

pub(crate) fn read_string(payload: &[u8], def: &FieldDef) -> Option<String> {
    let bytes = match def.ty {
        FieldType::Str(len) => payload.get(def.offset..def.offset.checked_add(len)?)?,
        FieldType::Tail => payload.get(def.offset..)?,
        _ => return None,
    };
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let trimmed = bytes.get(..end).unwrap_or(&[]);
    Some(String::from_utf8_lossy(trimmed).into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn switch_payload(next_pid: i32, next_comm: &str) -> Vec<u8> {
        let mut data = Vec::with_capacity(48);
        data.extend_from_slice(&1u64.to_le_bytes());
        data.extend_from_slice(&next_pid.to_le_bytes());
        data.extend_from_slice(&120i32.to_le_bytes());
        data.extend_from_slice(&[0u8; COMM_LEN]);
        let mut comm = [0u8; COMM_LEN];
        comm[..next_comm.len()].copy_from_slice(next_comm.as_bytes());
        data.extend_from_slice(&comm);
        data
    }

    fn record(kind: EventKind, payload: Vec<u8>) -> RawRecord {
        RawRecord {
            timestamp_ns: 100,
            pid: 1,
            kind: kind as u16,
            missed: 0,
            flags: 0,
            preempt_count: 0,
            offset: 0,
            payload,
        }
    }

    #[test]
    fn test_event_kind_roundtrip() {
        for i in 1..=MAX_EVENT_KIND as u16 {
            let kind = EventKind::from_u16(i).expect("valid event kind");
            assert_eq!(kind as u16, i);
            assert_eq!(EventKind::from_id(kind.id()), Some(kind));
        }
        assert!(EventKind::from_u16(0).is_none());
        assert!(EventKind::from_u16(10).is_none());
        assert!(EventKind::from_id(OVERFLOW_EVENT_ID).is_none());
    }

    #[test]
    fn test_event_kind_from_name() {
        assert_eq!(
            EventKind::from_name("sched_switch"),
            Some(EventKind::SchedSwitch)
        );
        assert_eq!(EventKind::from_name("print"), Some(EventKind::Print));
        assert_eq!(EventKind::from_name("sched_switch[target]"), None);
    }

    #[test]
    fn test_all_event_kinds() {
        let all = EventKind::all();
        assert_eq!(all.len(), MAX_EVENT_KIND);
        assert_eq!(all.first().copied(), Some(EventKind::SchedSwitch));
        assert_eq!(all.last().copied(), Some(EventKind::Print));
    }

    #[test]
    fn test_switch_fields() {
        let rec = record(EventKind::SchedSwitch, switch_payload(77, "worker"));
        assert_eq!(rec.field_i64("next_pid"), Some(77));
        assert_eq!(rec.field_i64("next_prio"), Some(120));
        assert_eq!(rec.field_str("next_comm").as_deref(), Some("worker"));
        assert_eq!(rec.field_str("prev_comm").as_deref(), Some(""));
        assert_eq!(rec.field_i64("no_such_field"), None);
    }

    #[test]
    fn test_short_payload_hides_field() {
        let rec = record(EventKind::SchedWaking, vec![7, 0, 0, 0]);
        assert_eq!(rec.field_i64("pid"), Some(7));
        assert_eq!(rec.field_i64("target_cpu"), None);
    }

    #[test]
    fn test_unknown_kind_has_no_fields() {
        let mut rec = record(EventKind::Print, vec![0u8; 16]);
        rec.kind = 300;
        assert_eq!(rec.event_kind(), None);
        assert_eq!(rec.field_i64("ip"), None);
    }

    #[test]
    fn test_tail_string() {
        let mut payload = 0xffffu64.to_le_bytes().to_vec();
        payload.extend_from_slice(b"hello world\0junk");
        let rec = record(EventKind::Print, payload);
        assert_eq!(rec.field_str("buf").as_deref(), Some("hello world"));
        assert_eq!(rec.field_i64("ip"), Some(0xffff));
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::SchedWaking.to_string(), "sched_waking");
        assert_eq!(EventKind::SysExit.system(), "raw_syscalls");
    }
}
