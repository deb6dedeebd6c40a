use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Side;

/// Extracted and processed article. `link` is canonical and identifies the
/// article among all others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Storage identity, `None` until first saved.
    pub id: Option<i64>,
    pub source_name: String,
    pub link: String,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub authors: Vec<String>,
    pub published: Option<DateTime<Utc>>,
    pub image: Option<String>,
    pub keywords: BTreeSet<String>,
    pub side: Option<Side>,
    pub created_at: DateTime<Utc>,
}

impl Article {
    pub fn new(source_name: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            id: None,
            source_name: source_name.into(),
            link: link.into(),
            title: String::new(),
            content: String::new(),
            summary: String::new(),
            authors: Vec::new(),
            published: None,
            image: None,
            keywords: BTreeSet::new(),
            side: None,
            created_at: Utc::now(),
        }
    }

    /// Lower-cases, trims and drops empty keywords.
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        self
    }

    pub fn with_side(mut self, side: Option<Side>) -> Self {
        self.side = side;
        self
    }

    pub fn with_published(mut self, published: Option<DateTime<Utc>>) -> Self {
        self.published = published;
        self
    }

    /// Source name without its section suffix ("BBC - World" -> "BBC").
    pub fn short_source(&self) -> &str {
        normalize_source(&self.source_name)
    }
}

pub fn normalize_source(source_name: &str) -> &str {
    source_name.split('-').next().unwrap_or_default().trim()
}
