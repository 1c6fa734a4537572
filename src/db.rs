use crate::model::{AdUpdate, Feed, PendingAd};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and ensure the parent
/// directory exists. In-memory and non-sqlite URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query_part {
        Some(q) => format!("sqlite://{expanded}?{q}"),
        None => format!("sqlite://{expanded}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn insert_feed(
    pool: &Pool,
    partner_code: &str,
    locale: &str,
    reliable: bool,
    country_id: &str,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO feeds (partner_code, locale, reliable, country_id) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(partner_code)
    .bind(locale)
    .bind(reliable)
    .bind(country_id)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn insert_pending_ad(pool: &Pool, feed_id: i64, is_ready: bool) -> Result<i64> {
    let rec = sqlx::query("INSERT INTO temp_ads (feed_id, is_ready) VALUES (?, ?) RETURNING id")
        .bind(feed_id)
        .bind(is_ready)
        .fetch_one(pool)
        .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn set_property(pool: &Pool, ad_id: i64, name: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO temp_ad_properties (ad_id, name, value) VALUES (?, ?, ?) \
         ON CONFLICT (ad_id, name) DO UPDATE SET value = excluded.value",
    )
    .bind(ad_id)
    .bind(name)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn add_image(pool: &Pool, ad_id: i64, position: i64, internal_path: &str) -> Result<()> {
    sqlx::query("INSERT INTO temp_ad_images (ad_id, position, internal_path) VALUES (?, ?, ?)")
        .bind(ad_id)
        .bind(position)
        .bind(internal_path)
        .execute(pool)
        .await?;
    Ok(())
}

/// Ids of records eligible for selection: ready and not yet promoted. Returned
/// in storage order; the orchestrator shuffles client-side so the sampling
/// contract stays explicit and seedable.
#[instrument(skip_all)]
pub async fn eligible_ad_ids(pool: &Pool) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM temp_ads WHERE is_ready = 1 AND final_id IS NULL",
    )
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Load full pending ads (feed, properties, images) for the given ids.
#[instrument(skip_all)]
pub async fn fetch_ads(pool: &Pool, ids: &[i64]) -> Result<Vec<PendingAd>> {
    let mut ads = Vec::with_capacity(ids.len());
    for &id in ids {
        ads.push(fetch_ad(pool, id).await?);
    }
    Ok(ads)
}

#[instrument(skip_all)]
pub async fn fetch_ad(pool: &Pool, id: i64) -> Result<PendingAd> {
    let row = sqlx::query(
        "SELECT a.id, a.is_ready, a.final_id, a.error_message, a.created_at, \
                f.id AS feed_id, f.partner_code, f.locale, f.reliable, f.country_id \
         FROM temp_ads a JOIN feeds f ON f.id = a.feed_id WHERE a.id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| anyhow!("pending ad {id} not found"))?;

    let feed = Feed {
        id: row.get("feed_id"),
        partner_code: row.get("partner_code"),
        locale: row.get("locale"),
        reliable: row.get("reliable"),
        country_id: row.get("country_id"),
    };

    let properties: HashMap<String, String> =
        sqlx::query("SELECT name, value FROM temp_ad_properties WHERE ad_id = ?")
            .bind(id)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|row| (row.get("name"), row.get("value")))
            .collect();

    let images: Vec<String> = sqlx::query_scalar(
        "SELECT internal_path FROM temp_ad_images WHERE ad_id = ? ORDER BY position",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(PendingAd {
        id: row.get("id"),
        feed,
        is_ready: row.get("is_ready"),
        final_id: row.get("final_id"),
        error_message: row.get("error_message"),
        properties,
        images,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}

/// Apply all record mutations of one batch iteration in a single transaction.
/// Bounds data loss on crash to at most one in-flight batch.
#[instrument(skip_all)]
pub async fn apply_updates(pool: &Pool, updates: &[AdUpdate]) -> Result<()> {
    if updates.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    for update in updates {
        sqlx::query("UPDATE temp_ads SET final_id = ?, error_message = ? WHERE id = ?")
            .bind(update.final_id)
            .bind(update.error_message.as_deref())
            .bind(update.ad_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}
