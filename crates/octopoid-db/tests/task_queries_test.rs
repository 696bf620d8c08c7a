//! Integration tests for the task lifecycle queries: claiming, conditional
//! transition updates, lease expiry, and the dependent-unblock cascade.

use octopoid_db::models::{queue, Priority};
use octopoid_db::queries::tasks::{self as db, NewTask, TaskFilter, TaskPatch};
use octopoid_test_utils::{create_test_db, drop_test_db};
use sqlx::PgPool;

async fn create_task(pool: &PgPool, id: &str, role: &str, priority: Priority) {
    db::insert_task(
        pool,
        &NewTask {
            id,
            title: "a test task",
            role,
            priority,
            queue: queue::INCOMING,
            branch: "main",
            project_id: None,
            flow: None,
            blocked_by: None,
        },
    )
    .await
    .expect("insert_task should succeed");
}

#[tokio::test]
async fn insert_and_get_roundtrip() {
    let (pool, db_name) = create_test_db().await;

    create_task(&pool, "TASK-1", "implement", Priority::P1).await;

    let task = db::get_task(&pool, "TASK-1")
        .await
        .expect("get should succeed")
        .expect("task should exist");

    assert_eq!(task.id, "TASK-1");
    assert_eq!(task.queue, queue::INCOMING);
    assert_eq!(task.priority, Priority::P1);
    assert_eq!(task.version, 1);
    assert!(task.claimed_by.is_none());
    assert!(task.lease_expires_at.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_picks_highest_priority_then_oldest() {
    let (pool, db_name) = create_test_db().await;

    create_task(&pool, "TASK-low", "implement", Priority::P3).await;
    create_task(&pool, "TASK-high", "implement", Priority::P0).await;

    let claimed = db::claim_next_task(&pool, queue::INCOMING, None, "impl-1", "orch-1", 60)
        .await
        .expect("claim should succeed")
        .expect("a task should be claimable");

    assert_eq!(claimed.id, "TASK-high");
    assert_eq!(claimed.queue, queue::CLAIMED);
    assert_eq!(claimed.claimed_by.as_deref(), Some("impl-1"));
    assert_eq!(claimed.orchestrator.as_deref(), Some("orch-1"));
    assert_eq!(claimed.claimed_from.as_deref(), Some(queue::INCOMING));
    assert!(claimed.lease_expires_at.is_some());
    assert_eq!(claimed.attempt_count, 1);
    assert_eq!(claimed.version, 2);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_respects_role_filter() {
    let (pool, db_name) = create_test_db().await;

    create_task(&pool, "TASK-doc", "document", Priority::P0).await;

    let claimed = db::claim_next_task(
        &pool,
        queue::INCOMING,
        Some("implement"),
        "impl-1",
        "orch-1",
        60,
    )
    .await
    .expect("claim should succeed");
    assert!(claimed.is_none(), "role filter should exclude the task");

    let claimed = db::claim_next_task(
        &pool,
        queue::INCOMING,
        Some("document"),
        "doc-1",
        "orch-1",
        60,
    )
    .await
    .expect("claim should succeed");
    assert!(claimed.is_some());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_skips_paused_and_blocked_tasks() {
    let (pool, db_name) = create_test_db().await;

    create_task(&pool, "TASK-paused", "implement", Priority::P0).await;
    db::update_task_metadata(
        &pool,
        "TASK-paused",
        &TaskPatch {
            paused: Some(true),
            ..Default::default()
        },
    )
    .await
    .expect("patch should succeed");

    db::insert_task(
        &pool,
        &NewTask {
            id: "TASK-blocked",
            title: "blocked",
            role: "implement",
            priority: Priority::P0,
            queue: queue::INCOMING,
            branch: "main",
            project_id: None,
            flow: None,
            blocked_by: Some("TASK-paused"),
        },
    )
    .await
    .expect("insert should succeed");

    let claimed = db::claim_next_task(&pool, queue::INCOMING, None, "impl-1", "orch-1", 60)
        .await
        .expect("claim should succeed");
    assert!(claimed.is_none(), "paused and blocked tasks are invisible");

    // Paused tasks keep their queue.
    let paused = db::get_task(&pool, "TASK-paused").await.unwrap().unwrap();
    assert_eq!(paused.queue, queue::INCOMING);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn concurrent_claims_have_exactly_one_winner() {
    let (pool, db_name) = create_test_db().await;

    create_task(&pool, "TASK-race", "implement", Priority::P1).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            db::claim_next_task(
                &pool,
                queue::INCOMING,
                Some("implement"),
                &format!("impl-{i}"),
                "orch-1",
                60,
            )
            .await
            .expect("claim should not error")
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.expect("task should not panic").is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one concurrent claim should win");

    let task = db::get_task(&pool, "TASK-race").await.unwrap().unwrap();
    assert_eq!(task.queue, queue::CLAIMED);
    assert!(task.claimed_by.is_some());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn submit_requires_matching_version_and_owner() {
    let (pool, db_name) = create_test_db().await;

    create_task(&pool, "TASK-2", "implement", Priority::P2).await;
    let claimed = db::claim_next_task(&pool, queue::INCOMING, None, "impl-1", "orch-1", 60)
        .await
        .unwrap()
        .unwrap();

    // Wrong owner: no rows.
    let rows = db::transition_submit(&pool, "TASK-2", claimed.version, "impl-2", 1, 10)
        .await
        .unwrap();
    assert_eq!(rows, 0);

    // Stale version: no rows.
    let rows = db::transition_submit(&pool, "TASK-2", claimed.version - 1, "impl-1", 1, 10)
        .await
        .unwrap();
    assert_eq!(rows, 0);

    // Correct owner + version: succeeds and clears the lease fields.
    let rows = db::transition_submit(&pool, "TASK-2", claimed.version, "impl-1", 3, 42)
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let task = db::get_task(&pool, "TASK-2").await.unwrap().unwrap();
    assert_eq!(task.queue, queue::PROVISIONAL);
    assert_eq!(task.commits_count, 3);
    assert_eq!(task.turns_used, 42);
    assert!(task.submitted_at.is_some());
    assert!(task.claimed_by.is_none());
    assert!(task.orchestrator.is_none());
    assert!(task.lease_expires_at.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn expire_returns_task_and_stale_submit_loses() {
    let (pool, db_name) = create_test_db().await;

    create_task(&pool, "TASK-3", "implement", Priority::P2).await;
    // Negative lease: expired the moment it is claimed.
    let claimed = db::claim_next_task(&pool, queue::INCOMING, None, "impl-1", "orch-1", -1)
        .await
        .unwrap()
        .unwrap();

    let expired = db::expire_overdue_leases(&pool).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, "TASK-3");
    assert_eq!(expired[0].queue, queue::INCOMING);
    assert!(expired[0].claimed_by.is_none());
    assert!(expired[0].orchestrator.is_none());
    assert!(expired[0].lease_expires_at.is_none());

    // A submit against the stale claim must not move the task.
    let rows = db::transition_submit(&pool, "TASK-3", claimed.version, "impl-1", 1, 5)
        .await
        .unwrap();
    assert_eq!(rows, 0, "stale submit must lose to the expiry");

    // Second expiry scan is a no-op.
    let expired = db::expire_overdue_leases(&pool).await.unwrap();
    assert!(expired.is_empty());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn requeue_returns_to_claimed_from() {
    let (pool, db_name) = create_test_db().await;

    create_task(&pool, "TASK-4", "implement", Priority::P2).await;
    let claimed = db::claim_next_task(&pool, queue::INCOMING, None, "impl-1", "orch-1", 60)
        .await
        .unwrap()
        .unwrap();

    // Submit, then claim again from provisional (the reviewer path).
    db::transition_submit(&pool, "TASK-4", claimed.version, "impl-1", 1, 5)
        .await
        .unwrap();
    let reclaimed = db::claim_next_task(&pool, queue::PROVISIONAL, None, "review-1", "orch-1", 60)
        .await
        .unwrap()
        .expect("provisional task should be claimable");
    assert_eq!(reclaimed.claimed_from.as_deref(), Some(queue::PROVISIONAL));

    let rows = db::transition_requeue(&pool, "TASK-4", reclaimed.version, "review-1")
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let task = db::get_task(&pool, "TASK-4").await.unwrap().unwrap();
    assert_eq!(task.queue, queue::PROVISIONAL, "returns to re-entry queue");
    assert!(task.claimed_by.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn accept_and_cascade_unblock_are_idempotent() {
    let (pool, db_name) = create_test_db().await;

    create_task(&pool, "TASK-5", "implement", Priority::P1).await;
    db::insert_task(
        &pool,
        &NewTask {
            id: "TASK-6",
            title: "dependent",
            role: "implement",
            priority: Priority::P1,
            queue: queue::INCOMING,
            branch: "main",
            project_id: None,
            flow: None,
            blocked_by: Some("TASK-5"),
        },
    )
    .await
    .unwrap();

    let claimed = db::claim_next_task(&pool, queue::INCOMING, None, "impl-1", "orch-1", 60)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, "TASK-5", "blocked dependent must not be claimed");

    db::transition_submit(&pool, "TASK-5", claimed.version, "impl-1", 2, 20)
        .await
        .unwrap();
    let submitted = db::get_task(&pool, "TASK-5").await.unwrap().unwrap();
    let rows = db::transition_accept(&pool, "TASK-5", submitted.version, "flow")
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let unblocked = db::cascade_unblock(&pool, "TASK-5").await.unwrap();
    assert_eq!(unblocked, 1);

    let dependent = db::get_task(&pool, "TASK-6").await.unwrap().unwrap();
    assert!(dependent.blocked_by.is_none());

    // Running the cascade again is a no-op.
    let unblocked = db::cascade_unblock(&pool, "TASK-5").await.unwrap();
    assert_eq!(unblocked, 0);

    // The dependent is now claimable.
    let next = db::claim_next_task(&pool, queue::INCOMING, None, "impl-1", "orch-1", 60)
        .await
        .unwrap()
        .expect("dependent should be claimable after cascade");
    assert_eq!(next.id, "TASK-6");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reject_increments_counter_and_preserves_branch() {
    let (pool, db_name) = create_test_db().await;

    db::insert_task(
        &pool,
        &NewTask {
            id: "TASK-7",
            title: "rejectable",
            role: "implement",
            priority: Priority::P2,
            queue: queue::INCOMING,
            branch: "feature/shared",
            project_id: None,
            flow: None,
            blocked_by: None,
        },
    )
    .await
    .unwrap();

    let claimed = db::claim_next_task(&pool, queue::INCOMING, None, "impl-1", "orch-1", 60)
        .await
        .unwrap()
        .unwrap();
    db::transition_submit(&pool, "TASK-7", claimed.version, "impl-1", 1, 5)
        .await
        .unwrap();

    let submitted = db::get_task(&pool, "TASK-7").await.unwrap().unwrap();
    let rows = db::transition_reject(&pool, "TASK-7", submitted.version, queue::INCOMING, None)
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let task = db::get_task(&pool, "TASK-7").await.unwrap().unwrap();
    assert_eq!(task.queue, queue::INCOMING);
    assert_eq!(task.rejection_count, 1);
    assert_eq!(task.branch, "feature/shared");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn fail_records_reason_and_clears_lease() {
    let (pool, db_name) = create_test_db().await;

    create_task(&pool, "TASK-8", "implement", Priority::P2).await;
    let claimed = db::claim_next_task(&pool, queue::INCOMING, None, "impl-1", "orch-1", 60)
        .await
        .unwrap()
        .unwrap();

    let rows = db::transition_fail(&pool, "TASK-8", claimed.version, "impl-1", "agent crashed")
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let task = db::get_task(&pool, "TASK-8").await.unwrap().unwrap();
    assert_eq!(task.queue, queue::FAILED);
    assert_eq!(task.failure_reason.as_deref(), Some("agent crashed"));
    assert!(task.claimed_by.is_none());
    assert!(task.completed_at.is_some());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn metadata_patch_blocked_by_tristate() {
    let (pool, db_name) = create_test_db().await;

    create_task(&pool, "TASK-9", "implement", Priority::P2).await;

    // Set blocked_by.
    let task = db::update_task_metadata(
        &pool,
        "TASK-9",
        &TaskPatch {
            blocked_by: Some(Some("awaiting-approval".to_string())),
            ..Default::default()
        },
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(task.blocked_by.as_deref(), Some("awaiting-approval"));

    // Untouched when the patch leaves it out.
    let task = db::update_task_metadata(
        &pool,
        "TASK-9",
        &TaskPatch {
            title: Some("renamed".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(task.blocked_by.as_deref(), Some("awaiting-approval"));
    assert_eq!(task.title, "renamed");

    // Manual unblock.
    let task = db::update_task_metadata(
        &pool,
        "TASK-9",
        &TaskPatch {
            blocked_by: Some(None),
            ..Default::default()
        },
    )
    .await
    .unwrap()
    .unwrap();
    assert!(task.blocked_by.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn queue_counts_and_filters() {
    let (pool, db_name) = create_test_db().await;

    create_task(&pool, "TASK-a", "implement", Priority::P1).await;
    create_task(&pool, "TASK-b", "implement", Priority::P2).await;
    create_task(&pool, "TASK-c", "review", Priority::P2).await;

    let counts = db::queue_counts(&pool).await.unwrap();
    let incoming_implement = counts
        .iter()
        .find(|(q, r, _)| q == queue::INCOMING && r == "implement")
        .map(|(_, _, n)| *n);
    assert_eq!(incoming_implement, Some(2));

    let filter = TaskFilter {
        roles: Some(vec!["review".to_string()]),
        ..Default::default()
    };
    let tasks = db::list_tasks(&pool, &filter, 50, 0).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, "TASK-c");
    assert_eq!(db::count_tasks(&pool, &filter).await.unwrap(), 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}
