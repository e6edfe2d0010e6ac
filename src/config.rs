use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::couple::synthetic_id_from_name;
use crate::trace::event::{EventKind, OVERFLOW_EVENT_ID, OVERFLOW_EVENT_NAME};

/// Top-level configuration for trace loading.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Coupled-event synthesis.
    #[serde(default)]
    pub coupling: CouplingConfig,

    /// Timestamp calibration applied to every entry.
    #[serde(default)]
    pub calibration: CalibrationConfig,

    /// Acquisition tuning.
    #[serde(default)]
    pub load: LoadConfig,

    /// Visibility filters applied while loading.
    #[serde(default)]
    pub filters: FiltersConfig,
}

/// Coupled-event synthesis configuration.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CouplingConfig {
    /// Split coupled events into origin and target entries. Default: false.
    #[serde(default)]
    pub enabled: bool,
}

/// Timestamp calibration configuration.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CalibrationConfig {
    /// Signed offset added to every timestamp, in nanoseconds. Default: 0.
    #[serde(default)]
    pub clock_offset_ns: i64,
}

/// Acquisition configuration.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct LoadConfig {
    /// Scan CPU sections on the rayon pool instead of sequentially.
    #[serde(default)]
    pub parallel: bool,
}

/// Show/hide lists. For each dimension at most one of show and hide may be set.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FiltersConfig {
    #[serde(default)]
    pub show_tasks: Vec<i32>,
    #[serde(default)]
    pub hide_tasks: Vec<i32>,

    /// Event names, including `missed_events` and `<origin>[target]` names.
    #[serde(default)]
    pub show_events: Vec<String>,
    #[serde(default)]
    pub hide_events: Vec<String>,

    #[serde(default)]
    pub show_cpus: Vec<i32>,
    #[serde(default)]
    pub hide_cpus: Vec<i32>,
}

impl FiltersConfig {
    /// True when no list is set.
    pub fn is_empty(&self) -> bool {
        self.show_tasks.is_empty()
            && self.hide_tasks.is_empty()
            && self.show_events.is_empty()
            && self.hide_events.is_empty()
            && self.show_cpus.is_empty()
            && self.hide_cpus.is_empty()
    }
}

/// Resolve an event name to its entry event id.
pub fn resolve_event_name(name: &str) -> Result<i32> {
    if name == OVERFLOW_EVENT_NAME {
        return Ok(OVERFLOW_EVENT_ID);
    }
    if let Some(kind) = EventKind::from_name(name) {
        return Ok(kind.id());
    }
    match synthetic_id_from_name(name) {
        Some(id) => Ok(id),
        None => bail!("unknown event in filters: {name}"),
    }
}

/// Resolve a list of event names, rejecting unknown names.
pub fn resolve_event_names(names: &[String]) -> Result<HashSet<i32>> {
    names.iter().map(String::as_str).map(resolve_event_name).collect()
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            coupling: CouplingConfig::default(),
            calibration: CalibrationConfig::default(),
            load: LoadConfig::default(),
            filters: FiltersConfig::default(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::from_yaml(&data).with_context(|| format!("loading config file {}", path.display()))
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data).context("parsing config")?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        match self.log_level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => bail!("invalid log_level: {other}"),
        }

        let f = &self.filters;
        if !f.show_tasks.is_empty() && !f.hide_tasks.is_empty() {
            bail!("filters.show_tasks and filters.hide_tasks are mutually exclusive");
        }
        if !f.show_events.is_empty() && !f.hide_events.is_empty() {
            bail!("filters.show_events and filters.hide_events are mutually exclusive");
        }
        if !f.show_cpus.is_empty() && !f.hide_cpus.is_empty() {
            bail!("filters.show_cpus and filters.hide_cpus are mutually exclusive");
        }

        resolve_event_names(&f.show_events)?;
        resolve_event_names(&f.hide_events)?;

        for cpu in f.show_cpus.iter().chain(&f.hide_cpus) {
            if *cpu < 0 {
                bail!("negative cpu in filters: {cpu}");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::couple::{SWITCH_TARGET_EVENT_ID, WAKEUP_TARGET_EVENT_ID};

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert!(!cfg.coupling.enabled);
        assert_eq!(cfg.calibration.clock_offset_ns, 0);
        assert!(!cfg.load.parallel);
        assert!(cfg.filters.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let cfg = Config::from_yaml("{}").unwrap();
        assert_eq!(cfg.log_level, "info");
        assert!(!cfg.coupling.enabled);
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
log_level: debug
coupling:
  enabled: true
calibration:
  clock_offset_ns: -250
load:
  parallel: true
filters:
  hide_events: ["sched_waking[target]", "missed_events"]
  show_cpus: [0, 2]
"#;
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert!(cfg.coupling.enabled);
        assert_eq!(cfg.calibration.clock_offset_ns, -250);
        assert!(cfg.load.parallel);
        assert_eq!(cfg.filters.show_cpus, vec![0, 2]);
        assert_eq!(cfg.filters.hide_events.len(), 2);
    }

    #[test]
    fn test_invalid_log_level() {
        let cfg = Config {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("invalid log_level"));
    }

    #[test]
    fn test_show_and_hide_are_exclusive() {
        let mut cfg = Config::default();
        cfg.filters.show_tasks = vec![1];
        cfg.filters.hide_tasks = vec![2];
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.filters.show_cpus = vec![1];
        cfg.filters.hide_cpus = vec![2];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unknown_event_name_rejected() {
        let mut cfg = Config::default();
        cfg.filters.show_events = vec!["sched_switch".to_string(), "bogus".to_string()];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_negative_cpu_rejected() {
        let mut cfg = Config::default();
        cfg.filters.hide_cpus = vec![-1];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_resolve_event_name() {
        assert_eq!(resolve_event_name("print").unwrap(), EventKind::Print.id());
        assert_eq!(resolve_event_name("missed_events").unwrap(), OVERFLOW_EVENT_ID);
        assert_eq!(
            resolve_event_name("sched_switch[target]").unwrap(),
            SWITCH_TARGET_EVENT_ID
        );
        assert_eq!(
            resolve_event_name("sched_waking[target]").unwrap(),
            WAKEUP_TARGET_EVENT_ID
        );
        assert!(resolve_event_name("sched_wakeup[target]").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ktrace.yaml");
        std::fs::write(&path, "coupling:\n  enabled: true\n").unwrap();

        let cfg = Config::load(&path).unwrap();
        assert!(cfg.coupling.enabled);

        let missing = Config::load(&dir.path().join("missing.yaml"));
        assert!(missing.is_err());
    }
}
