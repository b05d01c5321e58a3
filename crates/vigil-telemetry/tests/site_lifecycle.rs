//! Integration tests for site administration and the cleanup cascade.

mod common;

use chrono::{Duration, Utc};
use serde_json::json;
use vigil_state::JobQueue;
use vigil_telemetry::config::{CleanupConfig, RetentionConfig};
use vigil_telemetry::model::{Category, SiteDraft};
use vigil_telemetry::retention::{
    RetentionSweeper, SiteCleanupWorker, SweepOutcome, SweepTarget, SITE_CLEANUP_QUEUE,
};
use vigil_telemetry::{TelemetryEnvelope, TelemetryError};

use common::TestEngine;

#[tokio::test]
async fn deleting_a_site_cascades_through_the_cleanup_worker() {
    let env = TestEngine::new();
    let doomed = env.site("doomed").await;
    let kept = env.site("kept").await;

    for site in [&doomed, &kept] {
        env.send(site, Category::Api, json!({"url": "/api/ping"})).await;
        env.send(site, Category::Event, json!({"tagName": "BUTTON"})).await;
        env.send(site, Category::UserFeedback, json!({"content": "hi"})).await;
    }

    env.engine.sites().delete(&doomed.id).await.unwrap();
    assert_eq!(env.queue.depth(SITE_CLEANUP_QUEUE).await.unwrap(), 1);

    let worker = SiteCleanupWorker::new(
        env.engine.registry().clone(),
        env.queue.clone(),
        CleanupConfig::default(),
    );
    assert!(worker.run_once().await.unwrap());
    assert!(!worker.run_once().await.unwrap());

    for collection in ["api_logs", "event_logs", "user_logs"] {
        assert_eq!(env.database.memory_collection(collection).len(), 1, "{collection}");
    }
    assert_eq!(env.database.memory_collection("log_index").len(), 2);

    let err = env
        .engine
        .dispatcher()
        .ingest(TelemetryEnvelope::new(Category::Api, doomed.id.as_str()))
        .await
        .unwrap_err();
    assert!(matches!(err, TelemetryError::NotFound { entity: "site", .. }));
}

#[tokio::test]
async fn renamed_site_is_served_fresh_after_update() {
    let env = TestEngine::new();
    let site = env.site("before").await;
    assert_eq!(env.engine.sites().get(&site.id).await.unwrap().name, "before");

    let updated = env
        .engine
        .sites()
        .update(&site.id, SiteDraft::named("after"))
        .await
        .unwrap();
    assert_eq!(updated.create_at, site.create_at);
    assert_eq!(env.engine.sites().get(&site.id).await.unwrap().name, "after");

    let err = env.engine.sites().create(SiteDraft::named(" after ")).await.unwrap_err();
    assert!(matches!(err, TelemetryError::Duplicate(_)));
}

#[tokio::test]
async fn retention_removes_expired_records_with_their_index_entries() {
    let env = TestEngine::new();
    let site = env.site("shop").await;
    env.send(&site, Category::Api, json!({"url": "/old"})).await;
    env.send(&site, Category::Pageview, json!({"path": "/old"})).await;

    let sweeper = RetentionSweeper::new(
        env.engine.registry().clone(),
        env.leases.clone(),
        RetentionConfig::default(),
    );
    let later = Utc::now() + Duration::days(6);

    let outcome = sweeper
        .sweep_at(SweepTarget::Category(Category::Api), later)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SweepOutcome::Swept {
            records: 1,
            index_entries: 1
        }
    );
    assert!(env.database.memory_collection("api_logs").is_empty());

    let outcome = sweeper
        .sweep_at(SweepTarget::Category(Category::Pageview), later)
        .await
        .unwrap();
    assert_eq!(outcome, SweepOutcome::Unbounded);
    assert_eq!(env.database.memory_collection("pv_logs").len(), 1);
    assert_eq!(env.database.memory_collection("log_index").len(), 1);
}
