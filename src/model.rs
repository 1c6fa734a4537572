use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Ingest feed reference data. Read-only for this job; drives moderation
/// defaults and locale resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub partner_code: String,
    pub locale: String,
    pub reliable: bool,
    pub country_id: String,
}

/// A staged ad awaiting promotion. A set `final_id` means the record is
/// terminally processed and must never be selected again.
#[derive(Debug, Clone)]
pub struct PendingAd {
    pub id: i64,
    pub feed: Feed,
    pub is_ready: bool,
    pub final_id: Option<i64>,
    pub error_message: Option<String>,
    pub properties: HashMap<String, String>,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingAd {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }
}

/// Normalized payload for one submission attempt. Owned by the current batch
/// iteration and discarded after the loader call.
#[derive(Debug, Clone, Serialize)]
pub struct AdPayload {
    pub record_id: i64,
    pub data: Map<String, Value>,
    pub images: Vec<String>,
}

/// Per-record result of a loader call, correlated by `record_id`. Both fields
/// absent is tolerated and treated as success with no assigned id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadOutcome {
    #[serde(alias = "id")]
    pub record_id: i64,
    #[serde(default, alias = "ad_id")]
    pub assigned_id: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl LoadOutcome {
    pub fn is_error(&self) -> bool {
        self.error_message
            .as_deref()
            .is_some_and(|msg| !msg.is_empty())
    }
}

/// One pending-ad mutation, applied transactionally at the end of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdUpdate {
    pub ad_id: i64,
    pub final_id: Option<i64>,
    pub error_message: Option<String>,
}

/// Tally reported at the end of a run (best-effort on fatal abort).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub loaded_ok: u64,
    pub errors: u64,
    pub batches: u64,
}
