//! Destination-system loader: reference lookups, batch ingestion, and the
//! name → constructor registry.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{self, Config, LoaderKind};
use crate::model::{AdPayload, LoadOutcome};

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("{kind} `{id}` not found")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} lookup failed with status {status}: {body}")]
    Api {
        kind: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("{kind} lookup transport error: {source}")]
    Transport {
        kind: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LocationRef {
    #[serde(alias = "locationslug")]
    pub location_slug: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CountryRef {
    #[serde(alias = "countrydomain")]
    pub domain: String,
    #[serde(alias = "countryslug")]
    pub country_slug: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SubcategoryRef {
    #[serde(alias = "subcatslug")]
    pub subcat_slug: String,
}

/// Resolves destination-side identifiers to descriptive records.
#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    async fn location(&self, id: &str) -> Result<LocationRef, LookupError>;
    async fn country(&self, id: &str) -> Result<CountryRef, LookupError>;
    async fn subcategory(&self, id: &str) -> Result<SubcategoryRef, LookupError>;
}

/// Accepts one batch of normalized payloads and returns one outcome per
/// attempted payload, correlated by `record_id`. A wholesale failure here is
/// fatal for the run; there is no partial-submission fallback.
#[async_trait]
pub trait LoaderGateway: Send + Sync {
    async fn load(&self, payloads: &[AdPayload]) -> Result<Vec<LoadOutcome>>;
}

/// The resolved destination for one run: the same client behind both seams.
#[derive(Clone)]
pub struct ActiveLoader {
    pub gateway: Arc<dyn LoaderGateway>,
    pub refs: Arc<dyn ReferenceLookup>,
}

/// Registry mapping a loader identifier to a constructor. Plain polymorphic
/// dispatch over the config's `kind` discriminator.
pub fn create_loader(name: &str, cfg: &Config) -> Result<ActiveLoader> {
    let conn = cfg.loader(name)?;
    match conn.kind {
        LoaderKind::Http => {
            let client = Arc::new(HttpLoader::new(conn)?);
            Ok(ActiveLoader {
                gateway: client.clone(),
                refs: client,
            })
        }
    }
}

/// HTTP implementation of both seams against a destination loader API.
pub struct HttpLoader {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for HttpLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpLoader")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpLoader {
    pub fn new(conn: &config::Loader) -> Result<Self> {
        let base_url = Url::parse(&conn.base_url)
            .with_context(|| format!("invalid loader base URL `{}`", conn.base_url))?;
        let http = Client::builder()
            .user_agent("feed-promoter/0.1")
            .timeout(Duration::from_secs(conn.timeout_seconds))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key: conn.api_key.clone(),
        })
    }

    async fn get_ref<T>(&self, kind: &'static str, path: &str, id: &str) -> Result<T, LookupError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = self
            .base_url
            .join(&format!("{path}/{id}"))
            .map_err(|_| LookupError::NotFound {
                kind,
                id: id.to_string(),
            })?;
        let res = self
            .http
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|source| LookupError::Transport { kind, source })?;

        if res.status() == StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(kind, id, %status, "reference lookup failed");
            return Err(LookupError::Api { kind, status, body });
        }
        res.json::<T>()
            .await
            .map_err(|source| LookupError::Transport { kind, source })
    }
}

#[async_trait]
impl ReferenceLookup for HttpLoader {
    async fn location(&self, id: &str) -> Result<LocationRef, LookupError> {
        self.get_ref("location", "locations", id).await
    }

    async fn country(&self, id: &str) -> Result<CountryRef, LookupError> {
        self.get_ref("country", "countries", id).await
    }

    async fn subcategory(&self, id: &str) -> Result<SubcategoryRef, LookupError> {
        self.get_ref("subcategory", "subcategories", id).await
    }
}

#[async_trait]
impl LoaderGateway for HttpLoader {
    async fn load(&self, payloads: &[AdPayload]) -> Result<Vec<LoadOutcome>> {
        let endpoint = self
            .base_url
            .join("ads/load")
            .context("invalid loader base URL")?;
        info!(count = payloads.len(), url = %endpoint, "submitting batch to loader");

        let res = self
            .http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({ "ads": payloads }))
            .send()
            .await
            .context("failed to reach loader API")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by loader: {}", body);
            return Err(anyhow!("received 429 from loader: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "loader API error: {}", body);
            return Err(anyhow!("loader error {}: {}", status, body));
        }

        let outcomes: Vec<LoadOutcome> = res
            .json()
            .await
            .context("invalid loader response JSON")?;
        Ok(outcomes)
    }
}
