use dashmap::DashMap;

/// Name reported for pid 0.
pub const IDLE_TASK_NAME: &str = "<idle>";

/// Name reported for tasks whose command name was never seen.
pub const UNKNOWN_TASK_NAME: &str = "<...>";

/// Task-name table filled during acquisition.
///
/// Uses `DashMap` so per-CPU acquisition workers can register tasks without a
/// global lock. A pid maps to `None` until a record carrying its command
/// name is seen.
#[derive(Debug, Default)]
pub struct TaskTable {
    names: DashMap<i32, Option<String>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pid` if absent.
    pub fn register(&self, pid: i32) {
        self.names.entry(pid).or_insert(None);
    }

    /// Remember the command name of `pid`. Empty names are ignored.
    pub fn set_comm(&self, pid: i32, comm: &str) {
        if comm.is_empty() {
            self.register(pid);
            return;
        }
        self.names.insert(pid, Some(comm.to_string()));
    }

    /// Display name of `pid`.
    pub fn name(&self, pid: i32) -> String {
        if pid == 0 {
            return IDLE_TASK_NAME.to_string();
        }
        self.names
            .get(&pid)
            .and_then(|name| name.value().clone())
            .unwrap_or_else(|| UNKNOWN_TASK_NAME.to_string())
    }

    pub fn contains(&self, pid: i32) -> bool {
        self.names.contains_key(&pid)
    }

    /// All registered pids, sorted.
    pub fn pids(&self) -> Vec<i32> {
        let mut pids: Vec<i32> = self.names.iter().map(|e| *e.key()).collect();
        pids.sort_unstable();
        pids
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn clear(&self) {
        self.names.clear();
    }
}
