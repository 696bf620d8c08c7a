//! The agent result artifact: a single JSON document at a well-known path
//! inside the task runtime directory.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// What the agent says happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOutcome {
    Done,
    Failed,
    NeedsContinuation,
}

/// A reviewer's verdict (reviewer roles only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// The result document an agent writes before exiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultArtifact {
    pub outcome: ResultOutcome,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub commits_count: i32,
    #[serde(default)]
    pub turns_used: i32,
    #[serde(default)]
    pub decision: Option<ReviewDecision>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl ResultArtifact {
    /// A synthesized failure, used when an agent dies without writing a
    /// result or writes one we cannot parse.
    pub fn synthesized_failure(reason: impl Into<String>) -> Self {
        Self {
            outcome: ResultOutcome::Failed,
            reason: Some(reason.into()),
            commits_count: 0,
            turns_used: 0,
            decision: None,
            comment: None,
        }
    }
}

/// Read a result artifact. `Ok(None)` when the file does not exist; `Err`
/// when it exists but cannot be parsed (the caller treats that as a failed
/// outcome).
pub fn read_result(path: &Path) -> Result<Option<ResultArtifact>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read result {}", path.display()));
        }
    };

    let artifact = serde_json::from_str(&contents)
        .with_context(|| format!("malformed result artifact {}", path.display()))?;
    Ok(Some(artifact))
}

/// Delete a pre-existing result artifact before a new run. Run N+1's prepare
/// step must call this so a crash between runs cannot surface run N's
/// outcome as fresh.
///
/// Returns whether a stale artifact was present.
pub fn clear_stale_result(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => {
            Err(e).with_context(|| format!("failed to remove stale result {}", path.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_artifact() {
        let json = r#"{
            "outcome": "done",
            "reason": "all tests green",
            "commits_count": 3,
            "turns_used": 57,
            "decision": "approve",
            "comment": "ship it"
        }"#;
        let artifact: ResultArtifact = serde_json::from_str(json).unwrap();
        assert_eq!(artifact.outcome, ResultOutcome::Done);
        assert_eq!(artifact.commits_count, 3);
        assert_eq!(artifact.decision, Some(ReviewDecision::Approve));
    }

    #[test]
    fn parses_minimal_artifact() {
        let artifact: ResultArtifact =
            serde_json::from_str(r#"{"outcome": "needs_continuation"}"#).unwrap();
        assert_eq!(artifact.outcome, ResultOutcome::NeedsContinuation);
        assert_eq!(artifact.commits_count, 0);
        assert!(artifact.decision.is_none());
    }

    #[test]
    fn missing_file_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let result = read_result(&tmp.path().join("result.json")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("result.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(read_result(&path).is_err());
    }

    #[test]
    fn clear_stale_result_reports_presence() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("result.json");

        assert!(!clear_stale_result(&path).unwrap());

        std::fs::write(&path, r#"{"outcome": "done"}"#).unwrap();
        assert!(clear_stale_result(&path).unwrap());
        assert!(!path.exists());
    }
}
