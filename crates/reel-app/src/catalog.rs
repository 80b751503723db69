//! Slug-to-descriptor lookup backing `GET /stream/{slug}`.
//!
//! The catalog is a JSON object keyed by slug:
//!
//! ```json
//! { "big-buck-bunny": { "descriptor": "magnet:?xt=urn:btih:...", "title": "Big Buck Bunny" } }
//! ```
//!
//! Slugs that are themselves a 40-character hex hash resolve without an entry.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use reel_torrent_core::{CatalogResolver, ContentDescriptor, InfoHash};
use serde::Deserialize;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
struct CatalogEntry {
    descriptor: String,
    #[serde(default)]
    title: String,
}

/// In-memory catalog loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: HashMap<String, ContentDescriptor>,
}

impl StaticCatalog {
    /// Read a catalog file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid catalog.
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw =
            std::fs::read_to_string(path).map_err(|err| AppError::io("catalog.read", path, err))?;
        let entries: HashMap<String, CatalogEntry> =
            serde_json::from_str(&raw).map_err(|source| AppError::Catalog {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_entries(entries.into_iter().map(|(slug, entry)| {
            (slug, ContentDescriptor::new(entry.descriptor, entry.title))
        })))
    }

    /// Build from `(slug, descriptor)` pairs.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = (String, ContentDescriptor)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Number of configured slugs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no slugs are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CatalogResolver for StaticCatalog {
    async fn resolve(&self, slug: &str) -> anyhow::Result<Option<ContentDescriptor>> {
        if let Some(descriptor) = self.entries.get(slug) {
            return Ok(Some(descriptor.clone()));
        }
        let bare_hash = slug.len() == 40 && InfoHash::parse(slug).is_ok();
        Ok(bare_hash.then(|| ContentDescriptor::new(slug, "")))
    }
}
