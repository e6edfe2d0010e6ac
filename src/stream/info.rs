use std::fmt;

use crate::trace::event::{
    read_numeric, read_string, EventKind, RawRecord, FLAG_HARDIRQ, FLAG_IRQS_OFF,
    FLAG_NEED_RESCHED, FLAG_SOFTIRQ,
};

/// A decoded payload field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Int(i64),
    Str(String),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Str(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// Decode the payload field `name` of `record`.
pub fn field_value(record: &RawRecord, name: &str) -> Option<FieldValue> {
    let def = record.event_kind()?.field(name)?;
    if def.is_numeric() {
        read_numeric(&record.payload, def).map(FieldValue::Int)
    } else {
        read_string(&record.payload, def).map(FieldValue::Str)
    }
}

/// ftrace-style latency column: irqs-off, need-resched, irq context and
/// preempt depth, e.g. `d.h1`.
pub fn format_latency(record: &RawRecord) -> String {
    let irqs = if record.flags & FLAG_IRQS_OFF != 0 { 'd' } else { '.' };
    let resched = if record.flags & FLAG_NEED_RESCHED != 0 { 'N' } else { '.' };
    let hard = record.flags & FLAG_HARDIRQ != 0;
    let soft = record.flags & FLAG_SOFTIRQ != 0;
    let context = match (hard, soft) {
        (true, true) => 'H',
        (true, false) => 'h',
        (false, true) => 's',
        (false, false) => '.',
    };

    let mut out = String::with_capacity(4);
    out.push(irqs);
    out.push(resched);
    out.push(context);
    if record.preempt_count == 0 {
        out.push('.');
    } else {
        out.push_str(&format!("{:x}", record.preempt_count));
    }
    out
}

fn prev_state(state: i64) -> String {
    match state {
        0 => "R".to_string(),
        1 => "S".to_string(),
        2 => "D".to_string(),
        4 => "T".to_string(),
        8 => "t".to_string(),
        16 => "X".to_string(),
        32 => "Z".to_string(),
        other => format!("{other:#x}"),
    }
}

/// Human-readable payload summary. Empty for unknown kinds.
pub fn format_info(record: &RawRecord) -> String {
    let Some(kind) = record.event_kind() else {
        return String::new();
    };
    let int = |name: &str| record.field_i64(name).unwrap_or_default();
    let text = |name: &str| record.field_str(name).unwrap_or_default();

    match kind {
        EventKind::SchedSwitch => format!(
            "prev_comm={} prev_pid={} prev_state={} ==> next_comm={} next_pid={} next_prio={}",
            text("prev_comm"),
            record.pid,
            prev_state(int("prev_state")),
            text("next_comm"),
            int("next_pid"),
            int("next_prio"),
        ),
        EventKind::SchedWaking | EventKind::SchedWakeup | EventKind::SchedWakeupNew => format!(
            "comm={} pid={} prio={} target_cpu={:03}",
            text("comm"),
            int("pid"),
            int("prio"),
            int("target_cpu"),
        ),
        EventKind::IrqHandlerEntry => format!("irq={} name={}", int("irq"), text("name")),
        EventKind::IrqHandlerExit => {
            let ret = if int("ret") == 1 { "handled" } else { "unhandled" };
            format!("irq={} ret={ret}", int("irq"))
        }
        EventKind::SysEnter => format!("NR {}", int("id")),
        EventKind::SysExit => format!("NR {} = {}", int("id"), int("ret")),
        EventKind::Print => text("buf"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::trace::write::{switch_payload, wake_payload};

    fn record(kind: EventKind, payload: Vec<u8>) -> RawRecord {
        RawRecord {
            timestamp_ns: 1,
            pid: 10,
            kind: kind as u16,
            missed: 0,
            flags: 0,
            preempt_count: 0,
            offset: 0,
            payload,
        }
    }

    #[test]
    fn test_switch_info() {
        let rec = record(
            EventKind::SchedSwitch,
            switch_payload(1, 20, 120, "bash", "kworker/0:1"),
        );
        assert_eq!(
            format_info(&rec),
            "prev_comm=bash prev_pid=10 prev_state=S ==> next_comm=kworker/0:1 next_pid=20 next_prio=120"
        );
    }

    #[test]
    fn test_waking_info() {
        let rec = record(EventKind::SchedWaking, wake_payload(42, 100, 3, "sleeper"));
        assert_eq!(
            format_info(&rec),
            "comm=sleeper pid=42 prio=100 target_cpu=003"
        );
    }

    #[test]
    fn test_syscall_and_print_info() {
        let mut payload = 7i64.to_le_bytes().to_vec();
        payload.extend_from_slice(&(-2i64).to_le_bytes());
        assert_eq!(format_info(&record(EventKind::SysExit, payload)), "NR 7 = -2");

        let mut payload = 0u64.to_le_bytes().to_vec();
        payload.extend_from_slice(b"hello\0");
        assert_eq!(format_info(&record(EventKind::Print, payload)), "hello");
    }

    #[test]
    fn test_unknown_kind_info_is_empty() {
        let mut rec = record(EventKind::Print, Vec::new());
        rec.kind = 77;
        assert_eq!(format_info(&rec), "");
    }

    #[test]
    fn test_latency() {
        let mut rec = record(EventKind::Print, Vec::new());
        assert_eq!(format_latency(&rec), "....");

        rec.flags = FLAG_IRQS_OFF | FLAG_HARDIRQ;
        rec.preempt_count = 1;
        assert_eq!(format_latency(&rec), "d.h1");

        rec.flags = FLAG_NEED_RESCHED | FLAG_HARDIRQ | FLAG_SOFTIRQ;
        rec.preempt_count = 0;
        assert_eq!(format_latency(&rec), ".NH.");
    }

    #[test]
    fn test_field_value() {
        let rec = record(EventKind::SchedWaking, wake_payload(42, 100, 3, "sleeper"));
        assert_eq!(field_value(&rec, "pid"), Some(FieldValue::Int(42)));
        assert_eq!(
            field_value(&rec, "comm"),
            Some(FieldValue::Str("sleeper".to_string()))
        );
        assert_eq!(field_value(&rec, "missing"), None);
        assert_eq!(field_value(&rec, "target_cpu").unwrap().to_string(), "3");
    }
}
