//! Locale-aware string translation, injected into the transformer as an
//! explicit capability instead of process-wide state.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("I/O error reading catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error in catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("no translation for key `{key}` in `{locale}/{namespace}`")]
    Missing {
        locale: String,
        namespace: String,
        key: String,
    },
}

/// Maps a `(locale, key, namespace)` triple to a localized string.
pub trait TranslationProvider: Send + Sync {
    fn translate(&self, locale: &str, key: &str, namespace: &str) -> Result<String, TranslateError>;
}

/// Catalog layout: locale → namespace → key → value.
type Catalog = HashMap<String, HashMap<String, HashMap<String, String>>>;

/// Translator backed by a static YAML catalog. Missing keys fall back to the
/// key itself, so in normal operation it never fails.
#[derive(Debug, Clone, Default)]
pub struct CatalogTranslator {
    catalog: Catalog,
}

impl CatalogTranslator {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    pub fn from_file(path: &Path) -> Result<Self, TranslateError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, TranslateError> {
        #[derive(Deserialize)]
        struct Doc {
            #[serde(default)]
            translations: Catalog,
        }
        let doc: Doc = serde_yaml::from_str(content)?;
        Ok(Self::new(doc.translations))
    }
}

impl TranslationProvider for CatalogTranslator {
    fn translate(&self, locale: &str, key: &str, namespace: &str) -> Result<String, TranslateError> {
        let hit = self
            .catalog
            .get(locale)
            .and_then(|namespaces| namespaces.get(namespace))
            .and_then(|entries| entries.get(key));
        Ok(hit.cloned().unwrap_or_else(|| key.to_string()))
    }
}
