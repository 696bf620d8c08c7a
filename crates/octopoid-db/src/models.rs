use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Queue names
// ---------------------------------------------------------------------------

/// Built-in queue names and helpers.
///
/// A task's `queue` column is a plain string so deployments can extend the
/// state set through registered flows. The built-ins are always valid;
/// anything else must be declared by a flow.
pub mod queue {
    pub const INCOMING: &str = "incoming";
    pub const CLAIMED: &str = "claimed";
    pub const PROVISIONAL: &str = "provisional";
    pub const DONE: &str = "done";
    pub const FAILED: &str = "failed";

    pub const BUILT_IN: [&str; 5] = [INCOMING, CLAIMED, PROVISIONAL, DONE, FAILED];

    pub fn is_built_in(name: &str) -> bool {
        BUILT_IN.contains(&name)
    }
}

/// Sentinel value for `blocked_by`: the task waits for an explicit human
/// approval rather than another task.
pub const AWAITING_APPROVAL: &str = "awaiting-approval";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Task priority. `P0` is highest. The textual form sorts in priority order,
/// which the claim query relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::P0 => "p0",
            Self::P1 => "p1",
            Self::P2 => "p2",
            Self::P3 => "p3",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = PriorityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "p0" => Ok(Self::P0),
            "p1" => Ok(Self::P1),
            "p2" => Ok(Self::P2),
            "p3" => Ok(Self::P3),
            other => Err(PriorityParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Priority`] string.
#[derive(Debug, Clone)]
pub struct PriorityParseError(pub String);

impl fmt::Display for PriorityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid priority: {:?}", self.0)
    }
}

impl std::error::Error for PriorityParseError {}

// ---------------------------------------------------------------------------

/// Presence status of an orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorStatus {
    Active,
    Idle,
    Offline,
}

impl fmt::Display for OrchestratorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Offline => "offline",
        };
        f.write_str(s)
    }
}

impl FromStr for OrchestratorStatus {
    type Err = OrchestratorStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "idle" => Ok(Self::Idle),
            "offline" => Ok(Self::Offline),
            other => Err(OrchestratorStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`OrchestratorStatus`] string.
#[derive(Debug, Clone)]
pub struct OrchestratorStatusParseError(pub String);

impl fmt::Display for OrchestratorStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid orchestrator status: {:?}", self.0)
    }
}

impl std::error::Error for OrchestratorStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Review,
    Complete,
    Archived,
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Review => "review",
            Self::Complete => "complete",
            Self::Archived => "archived",
        };
        f.write_str(s)
    }
}

impl FromStr for ProjectStatus {
    type Err = ProjectStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "review" => Ok(Self::Review),
            "complete" => Ok(Self::Complete),
            "archived" => Ok(Self::Archived),
            other => Err(ProjectStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ProjectStatus`] string.
#[derive(Debug, Clone)]
pub struct ProjectStatusParseError(pub String);

impl fmt::Display for ProjectStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid project status: {:?}", self.0)
    }
}

impl std::error::Error for ProjectStatusParseError {}

// ---------------------------------------------------------------------------
// Flow definition types
// ---------------------------------------------------------------------------

/// Kind of a transition condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// A deterministic executable; exit code 0 means satisfied.
    Script,
    /// Requires a recorded decision from a reviewer agent.
    Agent,
    /// Requires an explicit human approval record.
    Manual,
}

/// A single condition on a flow transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDef {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    /// Executable to invoke (`script` conditions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Reviewer role whose decision is consulted (`agent` conditions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Queue the task is routed to when the condition fails. Absent means
    /// the transition blocks instead of failing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_fail: Option<String>,
}

/// A declarative transition within a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowTransitionDef {
    pub from: String,
    pub to: String,
    /// Role of the agent responsible for driving this transition, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Named steps executed once all conditions are satisfied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionDef>,
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A task -- the unit of agent work.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub role: String,
    pub priority: Priority,
    pub queue: String,
    pub branch: String,
    pub project_id: Option<String>,
    pub flow: Option<String>,
    pub blocked_by: Option<String>,
    pub claimed_by: Option<String>,
    pub orchestrator: Option<String>,
    pub claimed_from: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub commits_count: i32,
    pub turns_used: i32,
    pub attempt_count: i32,
    pub rejection_count: i32,
    pub paused: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub accepted_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub pr_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A registered orchestrator. `id` is `<cluster>-<machine_id>`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Orchestrator {
    pub id: String,
    pub cluster: String,
    pub machine_id: String,
    pub repo_url: String,
    pub status: OrchestratorStatus,
    pub last_heartbeat_at: DateTime<Utc>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

/// A project grouping tasks on a shared feature branch.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub status: ProjectStatus,
    pub branch: String,
    pub base_branch: String,
    pub auto_accept: bool,
    pub created_at: DateTime<Utc>,
}

/// A registered flow: the declarative state machine for its tasks.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Flow {
    pub name: String,
    pub cluster: String,
    pub states: sqlx::types::Json<Vec<String>>,
    pub transitions: sqlx::types::Json<Vec<FlowTransitionDef>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An orchestrator-registered role name.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub name: String,
    pub cluster: String,
    pub created_at: DateTime<Utc>,
}

/// An append-only history event for a task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskHistory {
    pub id: i64,
    pub task_id: String,
    pub event: String,
    pub actor: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A durable message in a task's mailbox.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: i64,
    pub task_id: String,
    pub from_actor: String,
    pub to_actor: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Scheduler snapshot
// ---------------------------------------------------------------------------

/// One `(queue, role)` cell of the scheduler snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueCount {
    pub queue: String,
    pub role: String,
    pub count: i64,
}

/// The batch snapshot served by `GET /scheduler/poll` and consumed once per
/// orchestrator tick. Shared between the server and the scheduler so the
/// wire shape has a single definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub queue_counts: Vec<QueueCount>,
    /// Total tasks currently holding a lease, across all roles.
    pub claimed_total: i64,
    /// Tasks with a PR created but not yet merged or abandoned.
    pub open_prs: i64,
    /// Tasks awaiting flow-driven processing.
    pub provisional: Vec<Task>,
    /// Whether the polling orchestrator is registered and not offline.
    pub orchestrator_registered: bool,
    /// Every state declared by a registered flow.
    pub registered_states: Vec<String>,
}

impl SchedulerSnapshot {
    /// Claimable tasks for a role in a given queue.
    pub fn count_for(&self, queue_name: &str, role: &str) -> i64 {
        self.queue_counts
            .iter()
            .filter(|c| c.queue == queue_name && c.role == role)
            .map(|c| c.count)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_display_roundtrip() {
        let variants = [Priority::P0, Priority::P1, Priority::P2, Priority::P3];
        for v in &variants {
            let s = v.to_string();
            let parsed: Priority = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn priority_orders_highest_first() {
        assert!(Priority::P0 < Priority::P1);
        assert!(Priority::P1 < Priority::P3);
        // Lexicographic order of the textual form matches, which the claim
        // query's ORDER BY relies on.
        assert!(Priority::P0.to_string() < Priority::P3.to_string());
    }

    #[test]
    fn priority_invalid() {
        let result = "p9".parse::<Priority>();
        assert!(result.is_err());
    }

    #[test]
    fn orchestrator_status_display_roundtrip() {
        let variants = [
            OrchestratorStatus::Active,
            OrchestratorStatus::Idle,
            OrchestratorStatus::Offline,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: OrchestratorStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn orchestrator_status_invalid() {
        let result = "sleeping".parse::<OrchestratorStatus>();
        assert!(result.is_err());
    }

    #[test]
    fn project_status_display_roundtrip() {
        let variants = [
            ProjectStatus::Active,
            ProjectStatus::Review,
            ProjectStatus::Complete,
            ProjectStatus::Archived,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: ProjectStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn project_status_invalid() {
        let result = "paused".parse::<ProjectStatus>();
        assert!(result.is_err());
    }

    #[test]
    fn builtin_queues() {
        for q in queue::BUILT_IN {
            assert!(queue::is_built_in(q));
        }
        assert!(!queue::is_built_in("escalated"));
    }

    #[test]
    fn condition_def_serde_uses_type_tag() {
        let json = r#"{"type": "script", "command": "./check.sh", "on_fail": "failed"}"#;
        let cond: ConditionDef = serde_json::from_str(json).expect("should parse");
        assert_eq!(cond.kind, ConditionKind::Script);
        assert_eq!(cond.command.as_deref(), Some("./check.sh"));
        assert_eq!(cond.on_fail.as_deref(), Some("failed"));
    }

    #[test]
    fn flow_transition_def_defaults() {
        let json = r#"{"from": "provisional", "to": "done"}"#;
        let t: FlowTransitionDef = serde_json::from_str(json).expect("should parse");
        assert!(t.runs.is_empty());
        assert!(t.conditions.is_empty());
        assert!(t.agent.is_none());
    }
}
