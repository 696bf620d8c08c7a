//! Per-blueprint scheduler state: `state.json`.
//!
//! Written after every evaluation so the status command and dashboards can
//! show why a blueprint last declined to spawn without trawling logs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The guard that last blocked a blueprint, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub guard: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// The last per-run failure of a blueprint evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Observable state of one blueprint on one orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlueprintState {
    pub last_spawn_at: Option<DateTime<Utc>>,
    pub last_block: Option<BlockRecord>,
    pub last_error: Option<ErrorRecord>,
}

impl BlueprintState {
    /// Load the state file, treating a missing or unreadable file as fresh.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self).context("failed to serialize state")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write state {}", path.display()))?;
        Ok(())
    }

    pub fn record_spawn(&mut self, at: DateTime<Utc>) {
        self.last_spawn_at = Some(at);
        self.last_block = None;
        self.last_error = None;
    }

    pub fn record_block(&mut self, guard: &str, reason: &str) {
        self.last_block = Some(BlockRecord {
            guard: guard.to_string(),
            reason: reason.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_error(&mut self, message: &str) {
        self.last_error = Some(ErrorRecord {
            message: message.to_string(),
            at: Utc::now(),
        });
    }
}

/// Convenience: load, mutate, save.
pub fn update_state(path: &PathBuf, mutate: impl FnOnce(&mut BlueprintState)) -> Result<()> {
    let mut state = BlueprintState::load(path);
    mutate(&mut state);
    state.save(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_default() {
        let tmp = tempfile::TempDir::new().unwrap();
        let state = BlueprintState::load(&tmp.path().join("state.json"));
        assert_eq!(state, BlueprintState::default());
    }

    #[test]
    fn roundtrip_and_spawn_clears_block() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("state.json");

        let mut state = BlueprintState::default();
        state.record_block("backpressure", "no claimable work for implement");
        state.save(&path).unwrap();

        let mut loaded = BlueprintState::load(&path);
        assert_eq!(
            loaded.last_block.as_ref().map(|b| b.guard.as_str()),
            Some("backpressure")
        );

        loaded.record_spawn(Utc::now());
        assert!(loaded.last_block.is_none());
        assert!(loaded.last_spawn_at.is_some());
    }

    #[test]
    fn update_state_creates_parents() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("agents").join("impl").join("state.json");
        update_state(&path, |s| s.record_error("boom")).unwrap();

        let loaded = BlueprintState::load(&path);
        assert_eq!(
            loaded.last_error.as_ref().map(|e| e.message.as_str()),
            Some("boom")
        );
    }
}
