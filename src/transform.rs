//! Converts one pending ad into a normalized loader payload, deriving the
//! canonical publication URL.

use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::loader::{LookupError, ReferenceLookup};
use crate::model::{AdPayload, PendingAd};
use crate::slug::slugify;
use crate::translate::{TranslateError, TranslationProvider};

/// Placeholder for the destination-assigned id; substituted by the
/// destination system after promotion.
const REPLACE_ID: &str = "%REPLACEID%";

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("missing required property `{0}`")]
    MissingProperty(&'static str),
    #[error("reference lookup failed: {0}")]
    Lookup(#[from] LookupError),
    #[error("translation failed: {0}")]
    Translation(#[from] TranslateError),
}

pub struct AdTransformer {
    refs: Arc<dyn ReferenceLookup>,
    translator: Arc<dyn TranslationProvider>,
}

impl AdTransformer {
    pub fn new(refs: Arc<dyn ReferenceLookup>, translator: Arc<dyn TranslationProvider>) -> Self {
        Self { refs, translator }
    }

    /// Pure function of the record and the lookup/translation responses; no
    /// side effects.
    pub async fn transform(&self, ad: &PendingAd) -> Result<AdPayload, TransformError> {
        let canonical_url = self.canonical_url(ad).await?;

        let mut data = Map::new();
        for (name, value) in &ad.properties {
            data.insert(name.clone(), Value::from(value.clone()));
        }
        data.insert("sitioId".into(), Value::from(ad.id));
        data.insert("sitio".into(), Value::from(ad.feed.partner_code.clone()));
        data.insert("canonicalUrl".into(), Value::from(canonical_url));

        // Reliable feeds skip moderation and go live verified; unreliable
        // feeds get the exact complement.
        let reliable = ad.feed.reliable;
        data.insert("moderated".into(), Value::from(u8::from(!reliable)));
        data.insert("enabled".into(), Value::from(u8::from(reliable)));
        data.insert("verified".into(), Value::from(u8::from(reliable)));

        Ok(AdPayload {
            record_id: ad.id,
            data,
            images: ad.images.clone(),
        })
    }

    async fn canonical_url(&self, ad: &PendingAd) -> Result<String, TransformError> {
        let location_id = require(ad, "location_id")?;
        let subcategory_id = require(ad, "subcatid")?;
        let title = require(ad, "adtitle")?;

        let location = self.refs.location(location_id).await?;
        let country = self.refs.country(&ad.feed.country_id).await?;
        let subcategory = self.refs.subcategory(subcategory_id).await?;

        let mut subdomain = if location.location_slug.is_empty() {
            "www".to_string()
        } else {
            location.location_slug
        };
        // Legacy rule: cuba ads publish without a subdomain. The comparison
        // keeps its trailing dot, so the defaulted "www" never matches it.
        if subdomain == "www." && country.country_slug == "cuba" {
            subdomain = String::new();
        }

        let locale = &ad.feed.locale;
        let ad_url = self.translator.translate(locale, "AD_URL", "messages")?;
        let subcat_slug = self
            .translator
            .translate(locale, &subcategory.subcat_slug, "slugs")?;
        let title_slug = slugify(title, '_');

        Ok(format!(
            "http://{subdomain}.{domain}/{ad_url}/{subcat_slug}/{title_slug}-{REPLACE_ID}.html",
            domain = country.domain,
        ))
    }
}

fn require<'a>(ad: &'a PendingAd, name: &'static str) -> Result<&'a str, TransformError> {
    ad.property(name)
        .filter(|value| !value.is_empty())
        .ok_or(TransformError::MissingProperty(name))
}
