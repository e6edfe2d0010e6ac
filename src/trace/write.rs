use std::io;
use std::path::Path;

use super::event::{EventKind, COMM_LEN};
use super::parse::{CPU_SECTION_SIZE, FILE_HEADER_SIZE, MAGIC, RECORD_HEADER_SIZE, VERSION};

/// A record queued in a [`TraceWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub timestamp_ns: u64,
    pub pid: i32,
    pub kind: u16,
    pub missed: u32,
    pub flags: u8,
    pub preempt_count: u8,
    pub payload: Vec<u8>,
}

/// Builds trace files in the per-CPU section format.
///
/// Records are kept in insertion order per CPU; the writer does not sort them.
#[derive(Debug, Clone, Default)]
pub struct TraceWriter {
    cpus: Vec<Vec<PendingRecord>>,
}

impl TraceWriter {
    /// Create a writer with `cpu_count` (possibly empty) sections.
    pub fn new(cpu_count: usize) -> Self {
        Self {
            cpus: vec![Vec::new(); cpu_count],
        }
    }

    /// Number of CPU sections that will be written.
    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    /// Total queued records.
    pub fn record_count(&self) -> usize {
        self.cpus.iter().map(Vec::len).sum()
    }

    /// Queue a raw record on `cpu`, growing the CPU table if needed. The
    /// returned reference can be used to set `missed`, `flags` and
    /// `preempt_count`.
    #[allow(clippy::indexing_slicing)] // `cpus` is grown to cover `cpu` first.
    pub fn record(
        &mut self,
        cpu: usize,
        timestamp_ns: u64,
        pid: i32,
        kind: u16,
        payload: Vec<u8>,
    ) -> &mut PendingRecord {
        if cpu >= self.cpus.len() {
            self.cpus.resize_with(cpu + 1, Vec::new);
        }
        let list = &mut self.cpus[cpu];
        list.push(PendingRecord {
            timestamp_ns,
            pid,
            kind,
            missed: 0,
            flags: 0,
            preempt_count: 0,
            payload,
        });
        let last = list.len() - 1;
        &mut list[last]
    }

    /// Queue a `sched_switch` from `prev_pid` to `next_pid`.
    pub fn sched_switch(
        &mut self,
        cpu: usize,
        timestamp_ns: u64,
        prev_pid: i32,
        next_pid: i32,
        prev_comm: &str,
        next_comm: &str,
    ) -> &mut PendingRecord {
        let payload = switch_payload(1, next_pid, 120, prev_comm, next_comm);
        self.record(cpu, timestamp_ns, prev_pid, EventKind::SchedSwitch as u16, payload)
    }

    /// Queue a `sched_waking` of `target_pid` issued by `waker_pid`.
    pub fn sched_waking(
        &mut self,
        cpu: usize,
        timestamp_ns: u64,
        waker_pid: i32,
        target_pid: i32,
        target_cpu: i32,
        comm: &str,
    ) -> &mut PendingRecord {
        let payload = wake_payload(target_pid, 120, target_cpu, comm);
        self.record(cpu, timestamp_ns, waker_pid, EventKind::SchedWaking as u16, payload)
    }

    /// Queue a `sys_enter` for syscall `id`.
    pub fn sys_enter(&mut self, cpu: usize, timestamp_ns: u64, pid: i32, id: i64) -> &mut PendingRecord {
        self.record(
            cpu,
            timestamp_ns,
            pid,
            EventKind::SysEnter as u16,
            id.to_le_bytes().to_vec(),
        )
    }

    /// Queue a `print` record carrying `text`.
    pub fn print(&mut self, cpu: usize, timestamp_ns: u64, pid: i32, text: &str) -> &mut PendingRecord {
        let mut payload = Vec::with_capacity(8 + text.len() + 1);
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(text.as_bytes());
        payload.push(0);
        self.record(cpu, timestamp_ns, pid, EventKind::Print as u16, payload)
    }

    /// Encode the whole trace.
    pub fn encode(&self) -> Vec<u8> {
        let table_len = self.cpus.len() * CPU_SECTION_SIZE;
        let sections: Vec<Vec<u8>> = self.cpus.iter().map(|recs| encode_section(recs)).collect();
        let body_len: usize = sections.iter().map(Vec::len).sum();

        let mut out = Vec::with_capacity(FILE_HEADER_SIZE + table_len + body_len);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(self.cpus.len() as u32).to_le_bytes());

        let mut offset = (FILE_HEADER_SIZE + table_len) as u64;
        for section in &sections {
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&(section.len() as u64).to_le_bytes());
            offset += section.len() as u64;
        }
        for section in sections {
            out.extend_from_slice(&section);
        }
        out
    }

    /// Encode the trace and write it to `path`.
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, self.encode())
    }
}

fn encode_section(records: &[PendingRecord]) -> Vec<u8> {
    let len = records
        .iter()
        .map(|r| RECORD_HEADER_SIZE + r.payload.len())
        .sum();
    let mut out = Vec::with_capacity(len);

    for rec in records {
        let payload_len = u16::try_from(rec.payload.len()).unwrap_or(u16::MAX);
        out.extend_from_slice(&rec.timestamp_ns.to_le_bytes());
        out.extend_from_slice(&rec.pid.to_le_bytes());
        out.extend_from_slice(&rec.kind.to_le_bytes());
        out.extend_from_slice(&payload_len.to_le_bytes());
        out.extend_from_slice(&rec.missed.to_le_bytes());
        out.push(rec.flags);
        out.push(rec.preempt_count);
        out.extend_from_slice(&[0u8; 2]); // pad
        out.extend_from_slice(rec.payload.get(..usize::from(payload_len)).unwrap_or_default());
    }
    out
}

fn comm_bytes(comm: &str) -> [u8; COMM_LEN] {
    let mut out = [0u8; COMM_LEN];
    // Leave room for the terminating NUL.
    for (dst, src) in out.iter_mut().zip(comm.bytes().take(COMM_LEN - 1)) {
        *dst = src;
    }
    out
}

/// Encode a `sched_switch` payload.
pub fn switch_payload(
    prev_state: u64,
    next_pid: i32,
    next_prio: i32,
    prev_comm: &str,
    next_comm: &str,
) -> Vec<u8> {
    let mut data = Vec::with_capacity(16 + 2 * COMM_LEN);
    data.extend_from_slice(&prev_state.to_le_bytes());
    data.extend_from_slice(&next_pid.to_le_bytes());
    data.extend_from_slice(&next_prio.to_le_bytes());
    data.extend_from_slice(&comm_bytes(prev_comm));
    data.extend_from_slice(&comm_bytes(next_comm));
    data
}

/// Encode a `sched_waking`/`sched_wakeup`/`sched_wakeup_new` payload.
pub fn wake_payload(pid: i32, prio: i32, target_cpu: i32, comm: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(16 + COMM_LEN);
    data.extend_from_slice(&pid.to_le_bytes());
    data.extend_from_slice(&prio.to_le_bytes());
    data.extend_from_slice(&target_cpu.to_le_bytes());
    data.extend_from_slice(&[0u8; 4]); // pad
    data.extend_from_slice(&comm_bytes(comm));
    data
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::trace::parse::{parse_cpu_table, parse_file_header};

    #[test]
    fn test_encode_layout() {
        let mut writer = TraceWriter::new(2);
        writer.sys_enter(1, 10, 5, 1);
        let bytes = writer.encode();

        let header = parse_file_header(&bytes).unwrap();
        assert_eq!(header.cpu_count, 2);

        let sections =
            parse_cpu_table(&bytes[FILE_HEADER_SIZE..], 2, bytes.len() as u64).unwrap();
        assert_eq!(sections[0].len, 0);
        assert_eq!(sections[1].len, (RECORD_HEADER_SIZE + 8) as u64);
        assert_eq!(sections[1].end(), bytes.len() as u64);
    }

    #[test]
    fn test_record_grows_cpu_table() {
        let mut writer = TraceWriter::new(1);
        writer.print(3, 1, 1, "late cpu").missed = 2;
        assert_eq!(writer.cpu_count(), 4);
        assert_eq!(writer.record_count(), 1);
    }

    #[test]
    fn test_comm_is_truncated_and_terminated() {
        let bytes = comm_bytes("a-very-long-thread-name");
        assert_eq!(bytes[COMM_LEN - 1], 0);
        assert_eq!(&bytes[..4], b"a-ve");
    }

    #[test]
    fn test_switch_payload_matches_field_layout() {
        let payload = switch_payload(2, 33, 100, "prev", "next");
        let def = EventKind::SchedSwitch.field("next_comm").unwrap();
        assert_eq!(payload.len(), def.end());
    }
}
