//! The batch orchestrator: select → transform → submit → reconcile → commit,
//! looping until no eligible records remain.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::audit::AuditLog;
use crate::db::{self, Pool};
use crate::loader::LoaderGateway;
use crate::model::{AdUpdate, RunSummary};
use crate::transform::AdTransformer;

/// Marker prepended to transform failures persisted on the record.
pub const TRANSFORM_ERROR_PREFIX: &str = "Error while it is preparing data to load: ";

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub batch_size: usize,
    /// Cooperative throttle between batch iterations; zero disables it.
    pub pace: Duration,
    /// Fixed seed for the selection shuffle; tests pin this.
    pub seed: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            pace: Duration::ZERO,
            seed: None,
        }
    }
}

/// Drive one full run against the given gateway. Returns the final tally, or
/// an error on a batch-level gateway or store failure. Prior batches stay
/// committed either way, and the summary line is written best-effort.
pub async fn run(
    pool: &Pool,
    gateway: &dyn LoaderGateway,
    transformer: &AdTransformer,
    audit: &mut AuditLog,
    opts: &RunOptions,
) -> Result<RunSummary> {
    let mut rng = match opts.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    // Ids attempted in this run; at most one submission attempt per record.
    let mut attempted: HashSet<i64> = HashSet::new();
    let mut summary = RunSummary::default();

    loop {
        // Select: eligible ids minus this run's attempts, sampled uniformly.
        let mut ids = db::eligible_ad_ids(pool).await?;
        ids.retain(|id| !attempted.contains(id));
        ids.shuffle(&mut rng);
        ids.truncate(opts.batch_size);

        if ids.is_empty() {
            info!(
                loaded_ok = summary.loaded_ok,
                errors = summary.errors,
                batches = summary.batches,
                "run finished"
            );
            audit.summary(&summary)?;
            return Ok(summary);
        }
        attempted.extend(ids.iter().copied());
        summary.batches += 1;

        // Transform: one bad record never aborts the batch.
        let ads = db::fetch_ads(pool, &ids).await?;
        let mut updates: Vec<AdUpdate> = Vec::with_capacity(ads.len());
        let mut payloads = Vec::with_capacity(ads.len());
        for ad in &ads {
            match transformer.transform(ad).await {
                Ok(payload) => payloads.push(payload),
                Err(err) => {
                    let message = format!("{TRANSFORM_ERROR_PREFIX}{err}");
                    warn!(ad_id = ad.id, %err, "transform failed; skipping record");
                    audit.record(ad.id, None, Some(&message))?;
                    updates.push(AdUpdate {
                        ad_id: ad.id,
                        final_id: None,
                        error_message: Some(message),
                    });
                    summary.errors += 1;
                }
            }
        }

        // Submit: one whole-batch gateway call. A wholesale failure is fatal;
        // nothing from this batch is reconciled or committed.
        let outcomes = match gateway.load(&payloads).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                error!(?err, batch = summary.batches, "loader gateway failed; aborting run");
                let _ = audit.summary(&summary);
                return Err(err.context("loader gateway call failed"));
            }
        };

        // Reconcile: per-record outcomes, correlated by record id.
        for outcome in &outcomes {
            let error = outcome
                .error_message
                .clone()
                .filter(|msg| !msg.is_empty());
            if error.is_some() {
                summary.errors += 1;
            } else {
                summary.loaded_ok += 1;
            }
            audit.record(outcome.record_id, outcome.assigned_id, error.as_deref())?;
            updates.push(AdUpdate {
                ad_id: outcome.record_id,
                final_id: outcome.assigned_id,
                error_message: error,
            });
        }

        // Commit: all mutations of this iteration in one transaction.
        db::apply_updates(pool, &updates).await?;

        if !opts.pace.is_zero() {
            tokio::time::sleep(opts.pace).await;
        }
    }
}
