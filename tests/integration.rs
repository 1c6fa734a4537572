use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use feed_promoter::audit::AuditLog;
use feed_promoter::db;
use feed_promoter::loader::{
    CountryRef, LoaderGateway, LocationRef, LookupError, ReferenceLookup, SubcategoryRef,
};
use feed_promoter::model::{AdPayload, LoadOutcome};
use feed_promoter::runner::{self, RunOptions, TRANSFORM_ERROR_PREFIX};
use feed_promoter::transform::AdTransformer;
use feed_promoter::translate::CatalogTranslator;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

struct StaticRefs;

#[async_trait]
impl ReferenceLookup for StaticRefs {
    async fn location(&self, id: &str) -> Result<LocationRef, LookupError> {
        match id {
            "10" => Ok(LocationRef {
                location_slug: "havana".into(),
            }),
            _ => Err(LookupError::NotFound {
                kind: "location",
                id: id.to_string(),
            }),
        }
    }

    async fn country(&self, id: &str) -> Result<CountryRef, LookupError> {
        match id {
            "1" => Ok(CountryRef {
                domain: "anunico.com.cu".into(),
                country_slug: "cuba".into(),
            }),
            _ => Err(LookupError::NotFound {
                kind: "country",
                id: id.to_string(),
            }),
        }
    }

    async fn subcategory(&self, id: &str) -> Result<SubcategoryRef, LookupError> {
        match id {
            "20" => Ok(SubcategoryRef {
                subcat_slug: "cars".into(),
            }),
            _ => Err(LookupError::NotFound {
                kind: "subcategory",
                id: id.to_string(),
            }),
        }
    }
}

/// Scripted reply for one `load` call; an exhausted script falls back to
/// `PassThrough`.
enum Reply {
    /// Every payload succeeds with `assigned_id = 1000 + record_id`.
    PassThrough,
    /// The whole call fails (transport-level).
    Fail(&'static str),
    /// Fixed per-record outcomes.
    Outcomes(Vec<LoadOutcome>),
}

/// Records every batch handed to `load` and replays the scripted replies.
#[derive(Clone, Default)]
struct RecordingGateway {
    calls: Arc<Mutex<Vec<Vec<i64>>>>,
    script: Arc<Mutex<VecDeque<Reply>>>,
}

impl RecordingGateway {
    fn scripted(script: Vec<Reply>) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::from(script))),
            ..Default::default()
        }
    }

    async fn calls(&self) -> Vec<Vec<i64>> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl LoaderGateway for RecordingGateway {
    async fn load(&self, payloads: &[AdPayload]) -> Result<Vec<LoadOutcome>> {
        self.calls
            .lock()
            .await
            .push(payloads.iter().map(|p| p.record_id).collect());
        let reply = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or(Reply::PassThrough);
        match reply {
            Reply::PassThrough => Ok(payloads
                .iter()
                .map(|p| LoadOutcome {
                    record_id: p.record_id,
                    assigned_id: Some(1000 + p.record_id),
                    error_message: None,
                })
                .collect()),
            Reply::Fail(msg) => Err(anyhow!(msg)),
            Reply::Outcomes(outcomes) => Ok(outcomes),
        }
    }
}

fn transformer() -> AdTransformer {
    let translator = CatalogTranslator::from_yaml(
        r#"translations:
  es_ES:
    messages:
      AD_URL: "aviso"
    slugs:
      cars: "autos"
"#,
    )
    .unwrap();
    AdTransformer::new(Arc::new(StaticRefs), Arc::new(translator))
}

async fn seed_ad(pool: &sqlx::SqlitePool, feed_id: i64, title: &str, complete: bool) -> i64 {
    let ad = db::insert_pending_ad(pool, feed_id, true).await.unwrap();
    if complete {
        db::set_property(pool, ad, "location_id", "10").await.unwrap();
    }
    db::set_property(pool, ad, "subcatid", "20").await.unwrap();
    db::set_property(pool, ad, "adtitle", title).await.unwrap();
    ad
}

fn opts(batch_size: usize) -> RunOptions {
    RunOptions {
        batch_size,
        pace: Duration::ZERO,
        seed: Some(42),
    }
}

fn audit() -> (tempfile::TempDir, AuditLog) {
    let td = tempfile::tempdir().unwrap();
    let log = AuditLog::open(td.path()).unwrap();
    (td, log)
}

#[tokio::test]
async fn empty_pool_terminates_without_batches() {
    let pool = setup_pool().await;
    let gateway = RecordingGateway::default();
    let (_td, mut log) = audit();

    let summary = runner::run(&pool, &gateway, &transformer(), &mut log, &opts(100))
        .await
        .unwrap();
    assert_eq!(summary.batches, 0);
    assert_eq!(summary.loaded_ok, 0);
    assert_eq!(summary.errors, 0);
    assert!(gateway.calls().await.is_empty());

    let content = std::fs::read_to_string(log.path()).unwrap();
    assert!(content.contains("FINISHED. ads loaded OK: 0. Errors: 0"));
}

#[tokio::test]
async fn full_run_promotes_all_records() {
    let pool = setup_pool().await;
    let feed = db::insert_feed(&pool, "acme", "es_ES", true, "1").await.unwrap();
    let mut ads = Vec::new();
    for i in 0..5 {
        ads.push(seed_ad(&pool, feed, &format!("Ad {i}"), true).await);
    }
    let gateway = RecordingGateway::default();
    let (_td, mut log) = audit();

    let summary = runner::run(&pool, &gateway, &transformer(), &mut log, &opts(2))
        .await
        .unwrap();
    // ceil(5/2) batches, all loaded.
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.loaded_ok, 5);
    assert_eq!(summary.errors, 0);

    for ad in &ads {
        let stored = db::fetch_ad(&pool, *ad).await.unwrap();
        assert_eq!(stored.final_id, Some(1000 + ad));
        assert!(stored.error_message.is_none());
    }

    // Each record was submitted exactly once across the run.
    let mut submitted: Vec<i64> = gateway.calls().await.into_iter().flatten().collect();
    submitted.sort_unstable();
    assert_eq!(submitted, ads);
}

#[tokio::test]
async fn promoted_records_are_never_reselected() {
    let pool = setup_pool().await;
    let feed = db::insert_feed(&pool, "acme", "es_ES", true, "1").await.unwrap();
    seed_ad(&pool, feed, "Ad", true).await;
    let gateway = RecordingGateway::default();
    let (_td, mut log) = audit();

    runner::run(&pool, &gateway, &transformer(), &mut log, &opts(100))
        .await
        .unwrap();
    let summary = runner::run(&pool, &gateway, &transformer(), &mut log, &opts(100))
        .await
        .unwrap();
    assert_eq!(summary.batches, 0);
    assert_eq!(gateway.calls().await.len(), 1);
}

#[tokio::test]
async fn transform_failures_are_isolated_from_the_batch() {
    let pool = setup_pool().await;
    let feed = db::insert_feed(&pool, "acme", "es_ES", true, "1").await.unwrap();
    let good_a = seed_ad(&pool, feed, "Good A", true).await;
    let bad = seed_ad(&pool, feed, "Bad", false).await; // missing location_id
    let good_b = seed_ad(&pool, feed, "Good B", true).await;
    let gateway = RecordingGateway::default();
    let (_td, mut log) = audit();

    let summary = runner::run(&pool, &gateway, &transformer(), &mut log, &opts(100))
        .await
        .unwrap();
    assert_eq!(summary.loaded_ok, 2);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.batches, 1);

    // N - K payloads submitted in the single gateway call.
    let calls = gateway.calls().await;
    assert_eq!(calls.len(), 1);
    let mut submitted = calls[0].clone();
    submitted.sort_unstable();
    assert_eq!(submitted, vec![good_a, good_b]);

    let stored = db::fetch_ad(&pool, bad).await.unwrap();
    assert!(stored.final_id.is_none());
    let message = stored.error_message.unwrap();
    assert!(message.starts_with(TRANSFORM_ERROR_PREFIX));
    assert!(message.contains("location_id"));
}

#[tokio::test]
async fn per_record_loader_errors_are_reconciled_not_retried() {
    let pool = setup_pool().await;
    let feed = db::insert_feed(&pool, "acme", "es_ES", true, "1").await.unwrap();
    let ad = seed_ad(&pool, feed, "Ad", true).await;
    let gateway = RecordingGateway::scripted(vec![Reply::Outcomes(vec![LoadOutcome {
        record_id: ad,
        assigned_id: None,
        error_message: Some("duplicate listing".into()),
    }])]);
    let (_td, mut log) = audit();

    let summary = runner::run(&pool, &gateway, &transformer(), &mut log, &opts(100))
        .await
        .unwrap();
    assert_eq!(summary.loaded_ok, 0);
    assert_eq!(summary.errors, 1);
    // At most one submission attempt per run: a single gateway call.
    assert_eq!(gateway.calls().await.len(), 1);

    let stored = db::fetch_ad(&pool, ad).await.unwrap();
    assert!(stored.final_id.is_none());
    assert_eq!(stored.error_message.as_deref(), Some("duplicate listing"));

    // Still eligible for a later run; only the in-run exclusion applied.
    let summary = runner::run(&pool, &gateway, &transformer(), &mut log, &opts(100))
        .await
        .unwrap();
    assert_eq!(summary.loaded_ok, 1);
    let stored = db::fetch_ad(&pool, ad).await.unwrap();
    assert_eq!(stored.final_id, Some(1000 + ad));
    assert!(stored.error_message.is_none());
}

#[tokio::test]
async fn outcome_without_id_or_error_counts_as_success() {
    let pool = setup_pool().await;
    let feed = db::insert_feed(&pool, "acme", "es_ES", true, "1").await.unwrap();
    let ad = seed_ad(&pool, feed, "Ad", true).await;
    let gateway = RecordingGateway::scripted(vec![Reply::Outcomes(vec![LoadOutcome {
        record_id: ad,
        assigned_id: None,
        error_message: None,
    }])]);
    let (_td, mut log) = audit();

    let summary = runner::run(&pool, &gateway, &transformer(), &mut log, &opts(100))
        .await
        .unwrap();
    assert_eq!(summary.loaded_ok, 1);
    assert_eq!(summary.errors, 0);

    let stored = db::fetch_ad(&pool, ad).await.unwrap();
    assert!(stored.final_id.is_none());
    assert!(stored.error_message.is_none());
}

#[tokio::test]
async fn gateway_failure_aborts_but_keeps_prior_commits() {
    let pool = setup_pool().await;
    let feed = db::insert_feed(&pool, "acme", "es_ES", true, "1").await.unwrap();
    let ads = vec![
        seed_ad(&pool, feed, "Ad 0", true).await,
        seed_ad(&pool, feed, "Ad 1", true).await,
        seed_ad(&pool, feed, "Ad 2", true).await,
    ];
    // Batch 1 succeeds, batch 2 fails wholesale, batch 3 must never run.
    let gateway = RecordingGateway::scripted(vec![
        Reply::PassThrough,
        Reply::Fail("connection reset"),
    ]);
    let (_td, mut log) = audit();

    let err = runner::run(&pool, &gateway, &transformer(), &mut log, &opts(1))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("loader gateway call failed"));

    let calls = gateway.calls().await;
    assert_eq!(calls.len(), 2);

    // Batch 1's mutation survives the abort; the batch 2 record was neither
    // reconciled nor committed, and batch 3 never executed.
    let promoted = calls[0][0];
    let stored = db::fetch_ad(&pool, promoted).await.unwrap();
    assert_eq!(stored.final_id, Some(1000 + promoted));
    for ad in ads.iter().filter(|id| **id != promoted) {
        let stored = db::fetch_ad(&pool, *ad).await.unwrap();
        assert!(stored.final_id.is_none());
        assert!(stored.error_message.is_none());
    }

    // Best-effort summary reflects the committed batch only.
    let content = std::fs::read_to_string(log.path()).unwrap();
    assert!(content.contains("FINISHED. ads loaded OK: 1. Errors: 0"));
}

#[tokio::test]
async fn audit_log_captures_every_attempted_record() {
    let pool = setup_pool().await;
    let feed = db::insert_feed(&pool, "acme", "es_ES", true, "1").await.unwrap();
    let good = seed_ad(&pool, feed, "Good", true).await;
    let bad = seed_ad(&pool, feed, "Bad", false).await;
    let gateway = RecordingGateway::default();
    let (_td, mut log) = audit();

    runner::run(&pool, &gateway, &transformer(), &mut log, &opts(100))
        .await
        .unwrap();

    let content = std::fs::read_to_string(log.path()).unwrap();
    assert!(content.contains(&format!("{} {} ", good, 1000 + good)));
    assert!(content.contains(&format!("{bad}  {TRANSFORM_ERROR_PREFIX}")));
    assert!(content.contains("FINISHED. ads loaded OK: 1. Errors: 1"));
}
