//! Per-blueprint pool tracking: `running_pids.json`.
//!
//! The tracker is the only source the `pool_capacity` guard consults, and
//! the idempotency barrier for result collection: once an instance entry is
//! removed, re-probing the same pid produces no duplicate transition.
//!
//! Instance entry lifecycle: inserted on spawn (running) -> pid dead with a
//! result present (finished) -> removed on collection. A dead pid with no
//! result past the zombie threshold is swept with a synthesized failure.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One live (or recently dead) agent instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub pid: u32,
    /// The claimed task, absent for lightweight instances.
    pub task_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// The on-disk instance map for one blueprint on one orchestrator.
///
/// Mutated only by the owning orchestrator; never shared across machines.
#[derive(Debug)]
pub struct PoolTracker {
    path: PathBuf,
    entries: BTreeMap<String, PoolEntry>,
}

impl PoolTracker {
    /// Load the tracker, treating a missing file as empty.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse pool tracker {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read pool tracker {}", path.display()));
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let contents =
            serde_json::to_string_pretty(&self.entries).context("failed to serialize pool")?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("failed to write pool tracker {}", self.path.display()))?;
        Ok(())
    }

    /// Record a freshly spawned instance.
    pub fn insert(&mut self, instance: &str, entry: PoolEntry) -> Result<()> {
        self.entries.insert(instance.to_string(), entry);
        self.save()
    }

    /// Remove an instance (collection). Returns the entry if it was present.
    pub fn remove(&mut self, instance: &str) -> Result<Option<PoolEntry>> {
        let removed = self.entries.remove(instance);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PoolEntry)> {
        self.entries.iter()
    }

    /// Instances whose process is no longer running, per the provided probe.
    /// These are the collection candidates: result present means finished,
    /// result missing past the grace window means zombie.
    pub fn finished(&self, alive: impl Fn(u32) -> bool) -> Vec<(String, PoolEntry)> {
        self.entries
            .iter()
            .filter(|(_, entry)| !alive(entry.pid))
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect()
    }
}

/// Build a unique instance name for a blueprint spawn.
pub fn instance_name(blueprint: &str) -> String {
    let nonce = Utc::now().timestamp_millis();
    format!("{blueprint}-{}-{nonce}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: u32, task: Option<&str>) -> PoolEntry {
        PoolEntry {
            pid,
            task_id: task.map(str::to_string),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let tracker = PoolTracker::load(&tmp.path().join("running_pids.json")).unwrap();
        assert!(tracker.is_empty());
    }

    #[test]
    fn insert_persists_and_reloads() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("running_pids.json");

        let mut tracker = PoolTracker::load(&path).unwrap();
        tracker.insert("implementer-1", entry(1234, Some("TASK-1"))).unwrap();
        tracker.insert("implementer-2", entry(5678, None)).unwrap();
        assert_eq!(tracker.len(), 2);

        let reloaded = PoolTracker::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        let (_, first) = reloaded.iter().next().unwrap();
        assert_eq!(first.pid, 1234);
        assert_eq!(first.task_id.as_deref(), Some("TASK-1"));
    }

    #[test]
    fn remove_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("running_pids.json");

        let mut tracker = PoolTracker::load(&path).unwrap();
        tracker.insert("implementer-1", entry(1234, None)).unwrap();

        assert!(tracker.remove("implementer-1").unwrap().is_some());
        assert!(tracker.remove("implementer-1").unwrap().is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn finished_reports_dead_pids_only() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut tracker = PoolTracker::load(&tmp.path().join("p.json")).unwrap();
        tracker.insert("a", entry(1, None)).unwrap();
        tracker.insert("b", entry(2, None)).unwrap();

        let finished = tracker.finished(|pid| pid == 1);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].0, "b");
    }

    #[test]
    fn instance_names_are_unique_per_call() {
        let a = instance_name("implementer");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = instance_name("implementer");
        assert_ne!(a, b);
        assert!(a.starts_with("implementer-"));
    }
}
