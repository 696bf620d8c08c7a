//! Database query functions for the append-only `messages` table.
//!
//! Messages are the durable mailbox between agents, reviewers, and humans.
//! The core imposes no semantics on `content` beyond it being JSON; the two
//! typed lookups below (`decision`, `approval`) are the ones flow conditions
//! consult.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::Message;

/// Fields for inserting a new message.
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub task_id: &'a str,
    pub from_actor: &'a str,
    pub to_actor: &'a str,
    pub kind: &'a str,
    pub content: serde_json::Value,
}

/// Append a message.
pub async fn insert_message(pool: &PgPool, new: &NewMessage<'_>) -> Result<Message> {
    let message = sqlx::query_as::<_, Message>(
        "INSERT INTO messages (task_id, from_actor, to_actor, type, content) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(new.task_id)
    .bind(new.from_actor)
    .bind(new.to_actor)
    .bind(new.kind)
    .bind(&new.content)
    .fetch_one(pool)
    .await
    .context("failed to insert message")?;

    Ok(message)
}

/// List messages, optionally filtered by task and type, oldest first.
pub async fn list_messages(
    pool: &PgPool,
    task_id: Option<&str>,
    kind: Option<&str>,
    limit: i64,
) -> Result<Vec<Message>> {
    let messages = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages \
         WHERE ($1::text IS NULL OR task_id = $1) \
           AND ($2::text IS NULL OR type = $2) \
         ORDER BY id ASC \
         LIMIT $3",
    )
    .bind(task_id)
    .bind(kind)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list messages")?;

    Ok(messages)
}

/// The most recent reviewer decision for a task, if any.
pub async fn latest_decision(pool: &PgPool, task_id: &str) -> Result<Option<Message>> {
    let message = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages \
         WHERE task_id = $1 AND type = 'decision' \
         ORDER BY id DESC \
         LIMIT 1",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest decision")?;

    Ok(message)
}

/// Whether an explicit human approval has been recorded for a task.
pub async fn has_approval(pool: &PgPool, task_id: &str) -> Result<bool> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM messages WHERE task_id = $1 AND type = 'approval')",
    )
    .bind(task_id)
    .fetch_one(pool)
    .await
    .context("failed to check approval")?;

    Ok(row.0)
}
