use std::collections::HashMap;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{normalize_site, Side, Site};

/// Snapshot of the whitelisted sites, keyed by normalized domain.
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    sites: HashMap<String, Site>,
}

impl SiteRegistry {
    pub fn new(sites: impl IntoIterator<Item = Site>) -> Self {
        let sites = sites
            .into_iter()
            .map(|site| (normalize_site(&site.site), site))
            .collect();
        Self { sites }
    }

    pub async fn load(repository: &Repository) -> Result<Self> {
        let registry = Self::new(repository.get_all_sites().await?);
        tracing::debug!("Loaded {} whitelisted sites", registry.len());
        Ok(registry)
    }

    pub fn get(&self, site: &str) -> Result<&Site> {
        let key = normalize_site(site);
        self.sites
            .get(&key)
            .ok_or(AppError::UnrecognizedSource(key))
    }

    pub fn side_for(&self, site: &str) -> Result<Side> {
        self.get(site).map(|s| s.side)
    }

    /// Display name of the site's publisher, falling back to the domain.
    pub fn source_name(&self, site: &str) -> Result<String> {
        let entry = self.get(site)?;
        Ok(entry.source.clone().unwrap_or_else(|| entry.site.clone()))
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}
