mod common;

use chrono::{Duration, Utc};
use common::*;
use ig_ingest::config::SyncSettings;
use ig_ingest::db;
use ig_ingest::error::SyncError;
use ig_ingest::model::{AccountStatus, RefreshOutcome, SkipReason, StopReason, TokenGrant};
use ig_ingest::orchestrator::run_batch;
use ig_ingest::trigger::{BatchTrigger, TriggerAck};
use std::sync::Arc;

fn settings(budget: u32) -> SyncSettings {
    SyncSettings {
        request_budget: budget,
        pacing: std::time::Duration::ZERO,
        ..SyncSettings::default()
    }
}

#[tokio::test]
async fn single_account_end_to_end() {
    let pool = setup_pool().await;
    seed_account(&pool, "A", 1, None).await;
    let graph = ScriptedGraph::new();
    let (t1, t2) = (ts(2), ts(1));
    graph
        .script_page("A", Ok(page(vec![post("p2", t1), post("p1", t2)], None)))
        .await;

    let summary = run_batch(&pool, &graph, &settings(150)).await.unwrap();

    assert_eq!(summary.accounts_total, 1);
    assert_eq!(summary.accounts_processed, 1);
    assert_eq!(summary.accounts_skipped, 0);
    assert_eq!(summary.requests_made, 1);
    assert_eq!(summary.request_ceiling, 150);
    assert_eq!(summary.posts_inserted, 2);
    assert!(!summary.budget_exhausted);
    assert!(!summary.degraded);

    let report = summary.report("A").unwrap();
    assert_eq!(report.token, Some(RefreshOutcome::Skipped));
    assert_eq!(
        report.status,
        AccountStatus::Synced {
            posts_inserted: 2,
            pages_fetched: 1,
            stop: StopReason::EndOfFeed,
            watermark: Some(t1),
            watermark_advanced: true,
        }
    );

    let stored = db::get_account(&pool, "A").await.unwrap().unwrap();
    assert_eq!(stored.last_synced_at, Some(t1));
    assert_eq!(db::count_posts(&pool, "A").await.unwrap(), 2);
}

#[tokio::test]
async fn second_run_resumes_from_watermark() {
    let pool = setup_pool().await;
    seed_account(&pool, "A", 1, None).await;
    let graph = ScriptedGraph::new();
    graph
        .script_page("A", Ok(page(vec![post("p2", ts(2)), post("p1", ts(1))], None)))
        .await;
    graph
        .script_page(
            "A",
            Ok(page(
                vec![post("p3", ts(3)), post("p2", ts(2)), post("p1", ts(1))],
                Some("A/2"),
            )),
        )
        .await;

    run_batch(&pool, &graph, &settings(150)).await.unwrap();
    let summary = run_batch(&pool, &graph, &settings(150)).await.unwrap();

    assert_eq!(summary.posts_inserted, 1);
    assert_eq!(summary.requests_made, 1);
    let stored = db::get_account(&pool, "A").await.unwrap().unwrap();
    assert_eq!(stored.last_synced_at, Some(ts(3)));
}

#[tokio::test]
async fn no_posts_leaves_watermark_unset() {
    let pool = setup_pool().await;
    seed_account(&pool, "A", 1, None).await;
    let graph = ScriptedGraph::new();

    let summary = run_batch(&pool, &graph, &settings(150)).await.unwrap();

    assert_eq!(summary.accounts_processed, 1);
    assert_eq!(summary.posts_inserted, 0);
    let stored = db::get_account(&pool, "A").await.unwrap().unwrap();
    assert_eq!(stored.last_synced_at, None);
}

#[tokio::test]
async fn accounts_run_in_priority_then_staleness_order() {
    let pool = setup_pool().await;
    seed_account(&pool, "fresh", 2, Some(ts(50))).await;
    seed_account(&pool, "stale", 2, Some(ts(5))).await;
    seed_account(&pool, "new", 2, None).await;
    seed_account(&pool, "vip", 1, Some(ts(90))).await;
    let graph = ScriptedGraph::new();

    run_batch(&pool, &graph, &settings(150)).await.unwrap();

    assert_eq!(
        graph.started_accounts().await,
        vec!["vip", "new", "stale", "fresh"]
    );
}

#[tokio::test]
async fn failing_account_does_not_stop_the_others() {
    let pool = setup_pool().await;
    seed_account(&pool, "one", 1, None).await;
    seed_account(&pool, "two", 2, Some(ts(1))).await;
    seed_account(&pool, "three", 3, None).await;
    let graph = ScriptedGraph::new();
    graph
        .script_page("one", Ok(page(vec![post("1a", ts(5))], None)))
        .await;
    graph
        .script_page(
            "two",
            Ok(page(vec![post("2b", ts(7)), post("2a", ts(6))], Some("two/2"))),
        )
        .await;
    graph
        .script_page("two/2", Err(SyncError::RemoteCall("connection reset".into())))
        .await;
    graph
        .script_page("three", Ok(page(vec![post("3a", ts(8))], None)))
        .await;

    let summary = run_batch(&pool, &graph, &settings(150)).await.unwrap();

    assert_eq!(summary.accounts_total, 3);
    assert_eq!(summary.accounts_processed, 2);
    assert_eq!(summary.accounts_skipped, 1);
    assert!(summary.report("one").unwrap().is_synced());
    assert!(summary.report("three").unwrap().is_synced());
    assert_eq!(
        summary.report("two").unwrap().skip_reason(),
        Some(&SkipReason::FetchFailed {
            error: SyncError::RemoteCall("connection reset".into()),
            posts_inserted: 2,
        })
    );
    // Rows from the failed attempt stay, but its watermark does not move.
    assert_eq!(summary.posts_inserted, 4);
    let two = db::get_account(&pool, "two").await.unwrap().unwrap();
    assert_eq!(two.last_synced_at, Some(ts(1)));
    let three = db::get_account(&pool, "three").await.unwrap().unwrap();
    assert_eq!(three.last_synced_at, Some(ts(8)));
    assert!(!summary.degraded);
}

#[tokio::test]
async fn budget_is_never_exceeded() {
    let pool = setup_pool().await;
    for (id, priority) in [("a", 1), ("b", 2), ("c", 3)] {
        seed_account(&pool, id, priority, None).await;
    }
    let graph = ScriptedGraph::new();
    for id in ["a", "b", "c"] {
        let next = format!("{id}/2");
        graph
            .script_page(
                id,
                Ok(page(vec![post(&format!("{id}1"), ts(2))], Some(next.as_str()))),
            )
            .await;
        graph
            .script_page(&next, Ok(page(vec![post(&format!("{id}0"), ts(1))], None)))
            .await;
    }

    let summary = run_batch(&pool, &graph, &settings(3)).await.unwrap();

    assert_eq!(graph.calls().await.len(), 3);
    assert_eq!(summary.requests_made, 3);
    assert!(summary.budget_exhausted);
    assert_eq!(summary.accounts_total, 3);

    match &summary.report("b").unwrap().status {
        AccountStatus::Synced { stop, pages_fetched, .. } => {
            assert_eq!(*stop, StopReason::BudgetExhausted);
            assert_eq!(*pages_fetched, 1);
        }
        other => panic!("unexpected status {other:?}"),
    }
    let c = summary.report("c").unwrap();
    assert_eq!(c.skip_reason(), Some(&SkipReason::BudgetExhausted));
    assert_eq!(c.token, None);
}

#[tokio::test]
async fn refresh_consuming_last_unit_skips_fetch() {
    let pool = setup_pool().await;
    let now = Utc::now();
    seed_account_with_token(&pool, "a", 1, None, None, now + Duration::days(1)).await;
    let graph = ScriptedGraph::new();
    graph
        .script_grant(Ok(TokenGrant {
            access_token: "renewed".into(),
            expires_in: Some(5_184_000),
        }))
        .await;

    let summary = run_batch(&pool, &graph, &settings(1)).await.unwrap();

    let report = summary.report("a").unwrap();
    assert!(matches!(report.token, Some(RefreshOutcome::Refreshed { .. })));
    assert_eq!(
        report.skip_reason(),
        Some(&SkipReason::BudgetExhaustedAfterTokenCheck)
    );
    assert!(graph.page_calls().await.is_empty());
    assert_eq!(summary.requests_made, 1);
}

#[tokio::test]
async fn failed_refresh_skips_only_that_account() {
    let pool = setup_pool().await;
    let now = Utc::now();
    seed_account_with_token(&pool, "expired", 1, None, None, now - Duration::days(2)).await;
    seed_account(&pool, "ok", 2, None).await;
    let graph = ScriptedGraph::new();
    graph
        .script_grant(Err(SyncError::Credential("Session has expired".into())))
        .await;
    graph
        .script_page("ok", Ok(page(vec![post("ok1", ts(1))], None)))
        .await;

    let summary = run_batch(&pool, &graph, &settings(150)).await.unwrap();

    assert_eq!(
        summary.report("expired").unwrap().skip_reason(),
        Some(&SkipReason::TokenRefreshFailed {
            error: SyncError::Credential("Session has expired".into()),
        })
    );
    assert!(summary.report("ok").unwrap().is_synced());
    assert_eq!(graph.started_accounts().await, vec!["ok"]);
    assert_eq!(summary.requests_made, 2);
}

#[tokio::test]
async fn refreshed_token_is_used_for_fetch() {
    let pool = setup_pool().await;
    let now = Utc::now();
    seed_account_with_token(&pool, "a", 1, None, None, now + Duration::days(2)).await;
    let graph = ScriptedGraph::new();
    graph
        .script_grant(Ok(TokenGrant {
            access_token: "renewed".into(),
            expires_in: Some(5_184_000),
        }))
        .await;

    run_batch(&pool, &graph, &settings(150)).await.unwrap();

    let calls = graph.calls().await;
    assert_eq!(calls.len(), 2);
    assert!(matches!(&calls[1], Call::Page { token, .. } if token == "renewed"));
}

#[tokio::test]
async fn panicking_account_is_isolated() {
    let pool = setup_pool().await;
    seed_account(&pool, "boom", 1, None).await;
    seed_account(&pool, "fine", 2, None).await;
    let graph = ScriptedGraph::new();
    graph.panic_on("boom").await;
    graph
        .script_page("fine", Ok(page(vec![post("f1", ts(1))], None)))
        .await;

    let summary = run_batch(&pool, &graph, &settings(150)).await.unwrap();

    match summary.report("boom").unwrap().skip_reason() {
        Some(SkipReason::Panicked { message }) => assert!(message.contains("boom")),
        other => panic!("unexpected skip reason {other:?}"),
    }
    assert!(summary.report("fine").unwrap().is_synced());
    assert_eq!(summary.requests_made, 2);
}

#[tokio::test]
async fn rate_limit_is_reported_but_not_fatal() {
    let pool = setup_pool().await;
    seed_account(&pool, "a", 1, None).await;
    seed_account(&pool, "b", 2, None).await;
    let graph = ScriptedGraph::new();
    graph
        .script_page("a", Err(SyncError::RateLimited("too many calls".into())))
        .await;
    graph
        .script_page("b", Ok(page(vec![post("b1", ts(1))], None)))
        .await;

    let summary = run_batch(&pool, &graph, &settings(150)).await.unwrap();

    assert!(summary.rate_limited);
    assert!(!summary.degraded);
    assert!(summary.report("b").unwrap().is_synced());
}

#[tokio::test]
async fn store_failure_marks_run_degraded() {
    let pool = setup_pool().await;
    seed_account(&pool, "a", 1, None).await;
    let graph = ScriptedGraph::new();
    graph
        .script_page("a", Ok(page(vec![post("a1", ts(1))], None)))
        .await;
    sqlx::query("DROP TABLE instagram_posts")
        .execute(&pool)
        .await
        .unwrap();

    let summary = run_batch(&pool, &graph, &settings(150)).await.unwrap();

    assert!(summary.degraded);
    assert_eq!(summary.store_errors, 1);
    let reason = summary.report("a").unwrap().skip_reason().unwrap();
    assert!(reason.error().unwrap().is_store());
    let stored = db::get_account(&pool, "a").await.unwrap().unwrap();
    assert_eq!(stored.last_synced_at, None);
}

#[tokio::test]
async fn unreadable_account_row_is_skipped_and_run_continues() {
    let pool = setup_pool().await;
    seed_account(&pool, "good", 2, None).await;
    sqlx::query(
        "INSERT INTO instagram_accounts (ig_user_id, account_name, access_token, token_expires_at, priority) \
         VALUES ('bad', 'Bad', 'token-bad', 'not-a-date', 1)",
    )
    .execute(&pool)
    .await
    .unwrap();
    let graph = ScriptedGraph::new();
    graph
        .script_page("good", Ok(page(vec![post("g1", ts(1))], None)))
        .await;

    let summary = run_batch(&pool, &graph, &settings(150)).await.unwrap();

    assert_eq!(summary.accounts_total, 2);
    assert_eq!(summary.accounts_processed, 1);
    let bad = summary.report("bad").unwrap();
    assert_eq!(bad.account_name, "Bad");
    assert!(matches!(
        bad.skip_reason(),
        Some(SkipReason::InvalidAccount { error }) if error.is_store()
    ));
    assert!(summary.report("good").unwrap().is_synced());
    assert_eq!(graph.started_accounts().await, vec!["good"]);
    assert_eq!(summary.requests_made, 1);
    assert!(summary.degraded);
    assert_eq!(summary.store_errors, 1);
}

#[tokio::test]
async fn summary_serializes_to_json() {
    let pool = setup_pool().await;
    seed_account(&pool, "a", 1, None).await;
    let graph = ScriptedGraph::new();
    graph
        .script_page("a", Ok(page(vec![post("a1", ts(1))], None)))
        .await;

    let summary = run_batch(&pool, &graph, &settings(150)).await.unwrap();
    let json = serde_json::to_value(&summary).unwrap();

    assert_eq!(json["accounts_processed"], 1);
    assert_eq!(json["requests_made"], 1);
    assert_eq!(json["posts_inserted"], 1);
    assert_eq!(json["budget_exhausted"], false);
    assert_eq!(json["accounts"][0]["ig_user_id"], "a");
    assert_eq!(json["accounts"][0]["status"], "synced");
    assert_eq!(json["accounts"][0]["token"]["status"], "skipped");
    assert_eq!(json["accounts"][0]["stop"], "end_of_feed");
    assert!(json["accounts"][0].get("access_token").is_none());
}

#[tokio::test]
async fn trigger_refuses_overlapping_runs() {
    let pool = setup_pool().await;
    seed_account(&pool, "a", 1, None).await;
    let graph = ScriptedGraph::new();
    graph
        .script_page("a", Ok(page(vec![post("a1", ts(1))], None)))
        .await;
    let trigger = BatchTrigger::new(pool.clone(), Arc::new(graph.clone()), settings(150));

    let handle = match trigger.trigger() {
        TriggerAck::Started(handle) => handle,
        TriggerAck::AlreadyRunning => panic!("first trigger should start a run"),
    };
    assert!(trigger.is_running());
    assert!(matches!(trigger.trigger(), TriggerAck::AlreadyRunning));

    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.posts_inserted, 1);
    assert!(!trigger.is_running());

    let again = trigger.run_now().await.unwrap();
    assert_eq!(again.posts_inserted, 0);
    assert_eq!(graph.started_accounts().await.len(), 2);
}
