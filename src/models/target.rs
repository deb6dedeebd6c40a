use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Side;

/// RSS feed source used by the crawler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedTarget {
    pub id: Option<i64>,
    pub source_name: String,
    pub link: String,
    /// Normalized domain of the publisher.
    pub site: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub enabled: bool,
    /// The feed is dead, never crawl it again.
    pub gone: bool,
    /// Crawling is suspended until authentication is supported.
    pub auth_required: bool,
    pub side: Option<Side>,
    pub created_at: DateTime<Utc>,
}

impl FeedTarget {
    pub fn new(
        source_name: impl Into<String>,
        link: impl Into<String>,
        site: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            source_name: source_name.into(),
            link: link.into(),
            site: site.into(),
            last_modified: None,
            etag: None,
            enabled: true,
            gone: false,
            auth_required: false,
            side: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the crawler may fetch this target at all.
    pub fn is_crawlable(&self) -> bool {
        self.enabled && !self.gone && !self.auth_required
    }
}
