//! HTTP SDK for the octopoid server.
//!
//! Thin typed wrapper over the `/api/v1` surface. Error classification
//! mirrors the server's `kind` field so callers can tell transient
//! contention (`stale_version`) from terminal guard failures
//! (`wrong_state`) without parsing message text.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use octopoid_db::models::{Flow, FlowTransitionDef, Message, Orchestrator, SchedulerSnapshot, Task};

/// Typed failure of an API call.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The resource does not exist. Terminal.
    #[error("not found: {0}")]
    NotFound(String),

    /// The task is not in the queue the transition requires, or the caller
    /// does not hold its lease. Terminal for this call.
    #[error("wrong state: {0}")]
    WrongState(String),

    /// The caller's version snapshot is stale. Retriable after a refetch.
    #[error("stale version: {0}")]
    StaleVersion(String),

    /// Any other non-2xx response.
    #[error("server error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ClientError {
    /// Whether a retry on the next tick could succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::StaleVersion(_) | Self::Http(_) | Self::Api { .. })
    }
}

/// Parameters for a claim attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimParams<'a> {
    pub orchestrator: &'a str,
    pub agent: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_filter: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_seconds: Option<i64>,
}

/// Client for the octopoid server API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    /// Create a client for a server base URL (e.g. `http://localhost:7420`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    /// Decode a response, mapping non-2xx statuses onto [`ClientError`].
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let status_code = status.as_u16();
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let message = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
            .to_string();
        let kind = body.get("kind").and_then(|v| v.as_str()).unwrap_or("");

        Err(match kind {
            "not_found" => ClientError::NotFound(message),
            "wrong_state" => ClientError::WrongState(message),
            "stale_version" => ClientError::StaleVersion(message),
            _ => ClientError::Api {
                status: status_code,
                message,
            },
        })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        Self::decode(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.http.get(self.url(path)).send().await?;
        Self::decode(response).await
    }

    // -------------------------------------------------------------------
    // Presence
    // -------------------------------------------------------------------

    pub async fn register_orchestrator(
        &self,
        cluster: &str,
        machine_id: &str,
        repo_url: &str,
    ) -> Result<Orchestrator, ClientError> {
        self.post(
            "/orchestrators/register",
            &serde_json::json!({
                "cluster": cluster,
                "machine_id": machine_id,
                "repo_url": repo_url,
            }),
        )
        .await
    }

    pub async fn heartbeat(&self, orchestrator_id: &str) -> Result<Orchestrator, ClientError> {
        self.post(
            &format!("/orchestrators/{orchestrator_id}/heartbeat"),
            &serde_json::json!({}),
        )
        .await
    }

    pub async fn poll(&self, orchestrator_id: &str) -> Result<SchedulerSnapshot, ClientError> {
        self.get(&format!("/scheduler/poll?orchestrator={orchestrator_id}"))
            .await
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    /// Atomic claim. `Ok(None)` means no eligible task.
    pub async fn claim(&self, params: &ClaimParams<'_>) -> Result<Option<Task>, ClientError> {
        self.post("/tasks/claim", params).await
    }

    pub async fn submit(
        &self,
        id: &str,
        version: i64,
        agent: &str,
        commits_count: i32,
        turns_used: i32,
        notes: Option<&str>,
    ) -> Result<Task, ClientError> {
        self.post(
            &format!("/tasks/{id}/submit"),
            &serde_json::json!({
                "version": version,
                "agent": agent,
                "commits_count": commits_count,
                "turns_used": turns_used,
                "notes": notes,
            }),
        )
        .await
    }

    pub async fn accept(
        &self,
        id: &str,
        version: i64,
        accepted_by: &str,
    ) -> Result<Task, ClientError> {
        self.post(
            &format!("/tasks/{id}/accept"),
            &serde_json::json!({ "version": version, "accepted_by": accepted_by }),
        )
        .await
    }

    pub async fn reject(
        &self,
        id: &str,
        version: i64,
        rejected_by: &str,
        reason: &str,
        to: Option<&str>,
    ) -> Result<Task, ClientError> {
        self.post(
            &format!("/tasks/{id}/reject"),
            &serde_json::json!({
                "version": version,
                "rejected_by": rejected_by,
                "reason": reason,
                "to": to,
            }),
        )
        .await
    }

    pub async fn fail(
        &self,
        id: &str,
        version: i64,
        agent: &str,
        reason: &str,
    ) -> Result<Task, ClientError> {
        self.post(
            &format!("/tasks/{id}/fail"),
            &serde_json::json!({ "version": version, "agent": agent, "reason": reason }),
        )
        .await
    }

    pub async fn requeue(
        &self,
        id: &str,
        version: i64,
        agent: &str,
        reason: &str,
    ) -> Result<Task, ClientError> {
        self.post(
            &format!("/tasks/{id}/requeue"),
            &serde_json::json!({ "version": version, "agent": agent, "reason": reason }),
        )
        .await
    }

    // -------------------------------------------------------------------
    // Tasks
    // -------------------------------------------------------------------

    pub async fn get_task(&self, id: &str) -> Result<Task, ClientError> {
        self.get(&format!("/tasks/{id}")).await
    }

    /// Record the PR created for a task's branch.
    pub async fn set_pr_url(&self, id: &str, pr_url: &str) -> Result<Task, ClientError> {
        let response = self
            .http
            .patch(self.url(&format!("/tasks/{id}")))
            .json(&serde_json::json!({ "pr_url": pr_url }))
            .send()
            .await?;
        Self::decode(response).await
    }

    // -------------------------------------------------------------------
    // Messages
    // -------------------------------------------------------------------

    pub async fn post_message(
        &self,
        task_id: &str,
        from_actor: &str,
        kind: &str,
        content: serde_json::Value,
    ) -> Result<Message, ClientError> {
        self.post(
            "/messages",
            &serde_json::json!({
                "task_id": task_id,
                "from_actor": from_actor,
                "type": kind,
                "content": content,
            }),
        )
        .await
    }

    pub async fn list_messages(
        &self,
        task_id: &str,
        kind: Option<&str>,
    ) -> Result<Vec<Message>, ClientError> {
        let path = match kind {
            Some(kind) => format!("/messages?task_id={task_id}&type={kind}"),
            None => format!("/messages?task_id={task_id}"),
        };
        self.get(&path).await
    }

    // -------------------------------------------------------------------
    // Flows and roles
    // -------------------------------------------------------------------

    pub async fn put_flow(
        &self,
        name: &str,
        cluster: &str,
        states: &[String],
        transitions: &[FlowTransitionDef],
    ) -> Result<Flow, ClientError> {
        let response = self
            .http
            .put(self.url(&format!("/flows/{name}")))
            .json(&serde_json::json!({
                "cluster": cluster,
                "states": states,
                "transitions": transitions,
            }))
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn get_flow(&self, name: &str) -> Result<Flow, ClientError> {
        self.get(&format!("/flows/{name}")).await
    }

    pub async fn list_flows(&self) -> Result<Vec<Flow>, ClientError> {
        self.get("/flows").await
    }

    pub async fn register_roles(&self, roles: &[String], cluster: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.url("/roles/register"))
            .json(&serde_json::json!({ "roles": roles, "cluster": cluster }))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Self::decode::<serde_json::Value>(response).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_returns_none_on_null_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/tasks/claim")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("null")
            .create_async()
            .await;

        let client = ApiClient::new(server.url());
        let claimed = client
            .claim(&ClaimParams {
                orchestrator: "dev-mbp",
                agent: "impl-1",
                role_filter: Some("implement"),
                queue: None,
                lease_seconds: None,
            })
            .await
            .expect("claim should succeed");
        assert!(claimed.is_none());

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_kinds_map_to_typed_variants() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/tasks/TASK-1/submit")
            .with_status(409)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "task TASK-1 is in queue \"incoming\", expected \"claimed\"", "kind": "wrong_state"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(server.url());
        let err = client
            .submit("TASK-1", 3, "impl-1", 0, 0, None)
            .await
            .expect_err("should be an error");
        assert!(matches!(err, ClientError::WrongState(_)));
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn stale_version_is_retriable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/tasks/TASK-1/accept")
            .with_status(409)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "task TASK-1 version 2 is stale (current 4)", "kind": "stale_version"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(server.url());
        let err = client
            .accept("TASK-1", 2, "flow")
            .await
            .expect_err("should be an error");
        assert!(matches!(err, ClientError::StaleVersion(_)));
        assert!(err.is_retriable());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = ApiClient::new("http://localhost:7420/");
        assert_eq!(client.base_url(), "http://localhost:7420");
    }
}
