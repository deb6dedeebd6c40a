use std::sync::Arc;

use chrono::{DateTime, FixedOffset, SubsecRound, Utc};

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{Article, FeedTarget, Side};
use crate::services::{strip_html, ArticleExtractor, SiteRegistry};

use super::canonical::{canonical_link, prefer_final_url};
use super::fetcher::{FeedEntry, FeedSource, FeedStatus};

/// Crawler for any type of RSS/Atom feed targets.
pub struct FeedCrawler {
    repository: Repository,
    source: Arc<dyn FeedSource>,
    extractor: Arc<dyn ArticleExtractor>,
    registry: Arc<SiteRegistry>,
    allowed_query_params: Vec<String>,
}

impl FeedCrawler {
    pub fn new(
        repository: Repository,
        source: Arc<dyn FeedSource>,
        extractor: Arc<dyn ArticleExtractor>,
        registry: Arc<SiteRegistry>,
        allowed_query_params: Vec<String>,
    ) -> Self {
        Self {
            repository,
            source,
            extractor,
            registry,
            allowed_query_params,
        }
    }

    /// Fetches what's new in `target` since its checkpoint and extracts up to
    /// `limit` articles out of it.
    ///
    /// The target's state (status flags, link, checkpoint) is updated both on
    /// `target` and in storage. The checkpoint only moves after every entry was
    /// processed, so an interrupted crawl starts over from the old one.
    pub async fn crawl(&self, target: &mut FeedTarget, limit: Option<usize>) -> Result<Vec<Article>> {
        let id = target.id.ok_or_else(|| {
            AppError::PreconditionFailed(format!("target {} was never saved", target.link))
        })?;
        if !target.is_crawlable() {
            tracing::debug!("Skipping target {} (disabled, gone or requires auth)", target.link);
            return Ok(Vec::new());
        }

        tracing::debug!(
            "Crawling target {} for articles newer than {:?}",
            target.link,
            target.last_modified
        );
        let response = self
            .source
            .fetch(&target.link, target.last_modified, target.etag.as_deref())
            .await?;

        if let Some(href) = response.moved_to.as_deref() {
            tracing::info!("RSS has moved for {} to {}", target.link, href);
            self.repository.update_target_link(id, href).await?;
            target.link = href.to_string();
        }

        match response.status {
            FeedStatus::Gone => {
                tracing::warn!("RSS is dead for {}", target.link);
                self.repository.mark_target_gone(id).await?;
                target.gone = true;
                return Ok(Vec::new());
            }
            FeedStatus::Unauthorized => {
                tracing::warn!("RSS requires auth for {}", target.link);
                self.repository.mark_target_auth_required(id).await?;
                target.auth_required = true;
                return Ok(Vec::new());
            }
            FeedStatus::NotModified => {
                tracing::info!("RSS has no new data for {}", target.link);
                return Ok(Vec::new());
            }
            FeedStatus::Ok => {}
        }

        // Feeds without modification metadata get a checkpoint computed from
        // their entries instead.
        let (entries, modified) = match response.modified {
            Some(modified) => (response.entries, Some(modified)),
            None => entries_after(response.entries, target.last_modified),
        };

        let now = Utc::now();
        let mut articles = Vec::new();
        for entry in &entries {
            if limit.is_some_and(|limit| articles.len() >= limit) {
                tracing::info!(
                    "Crawling limit of {} article(s) was reached for {}",
                    articles.len(),
                    target.link
                );
                break;
            }

            let Some(link) = entry.link.as_deref().filter(|l| !l.trim().is_empty()) else {
                tracing::warn!("Skipping entry {} of {} without a link", entry.id, target.link);
                continue;
            };

            match self.extract_article(link, entry, target, now).await {
                Ok(article) => articles.push(article),
                // Missing pages are routine, other failures deserve attention.
                Err(e) if e.is_not_found() => {
                    tracing::debug!("Got {} while parsing {}", e, entry.id)
                }
                Err(e) => tracing::warn!("Got {} while parsing {}", e, entry.id),
            }
        }

        self.repository
            .update_target_checkpoint(id, modified, response.etag.clone())
            .await?;
        target.last_modified = modified;
        target.etag = response.etag;

        tracing::debug!("Extracted {} articles from {}", articles.len(), target.link);
        Ok(articles)
    }

    /// Extracts a single article found outside of any feed. Its site must be
    /// registered, otherwise this fails with `UnrecognizedSource`.
    pub async fn extract_link(&self, link: &str) -> Result<Article> {
        let site = self.registry.get(link)?;
        let mut target = FeedTarget::new(self.registry.source_name(link)?, link, site.site.clone());
        target.side = Some(site.side);

        let entry = FeedEntry {
            id: link.to_string(),
            link: Some(link.to_string()),
            ..Default::default()
        };
        self.extract_article(link, &entry, &target, Utc::now()).await
    }

    async fn extract_article(
        &self,
        link: &str,
        entry: &FeedEntry,
        target: &FeedTarget,
        now: DateTime<Utc>,
    ) -> Result<Article> {
        let extracted = self.extractor.extract(link).await?;

        // The final URL (after redirects) identifies the article.
        let resolved = prefer_final_url(link, &extracted.url);
        let link = canonical_link(&resolved, Some(&target.site), &self.allowed_query_params)?;

        let title = non_empty(entry.title.clone())
            .or(extracted.title)
            .unwrap_or_default();
        let summary = non_empty(entry.summary.clone())
            .or_else(|| non_empty(entry.description.clone()))
            .or(extracted.summary)
            .map(|s| strip_html(&s))
            .unwrap_or_default();
        let published = entry
            .published
            .map(|dt| dt.fixed_offset())
            .or(extracted.publish_date)
            .map(|dt| normalize_date(dt, now));

        let mut article = Article::new(target.source_name.clone(), link)
            .with_keywords(extracted.keywords)
            .with_published(published)
            .with_side(self.resolve_side(target));
        article.title = title;
        article.summary = summary;
        article.content = extracted.text;
        article.authors = extracted.authors;
        article.image = extracted.top_image;
        Ok(article)
    }

    /// Side of the target's registered site, else the one set on the target.
    fn resolve_side(&self, target: &FeedTarget) -> Option<Side> {
        match self.registry.side_for(&target.site) {
            Ok(side) => Some(side),
            Err(e) => {
                tracing::debug!("{}, using the side of target {}", e, target.link);
                target.side
            }
        }
    }
}

/// Keeps the entries published after `checkpoint` (undated ones included) and
/// returns the newest publish date seen as the next checkpoint.
///
/// Dates are compared in whole seconds, the precision checkpoints are stored at.
fn entries_after(
    entries: Vec<FeedEntry>,
    checkpoint: Option<DateTime<Utc>>,
) -> (Vec<FeedEntry>, Option<DateTime<Utc>>) {
    let checkpoint = checkpoint.map(|c| c.trunc_subsecs(0));
    let mut newest = checkpoint;
    let kept: Vec<FeedEntry> = entries
        .into_iter()
        .filter(|entry| match (entry.published, checkpoint) {
            (Some(published), Some(checkpoint)) => published.trunc_subsecs(0) > checkpoint,
            _ => true,
        })
        .collect();

    for published in kept.iter().filter_map(|e| e.published.map(|p| p.trunc_subsecs(0))) {
        newest = Some(newest.map_or(published, |n| n.max(published)));
    }
    (kept, newest)
}

/// Converts to UTC and corrects dates from the future.
fn normalize_date(date: DateTime<FixedOffset>, now: DateTime<Utc>) -> DateTime<Utc> {
    date.with_timezone(&Utc).min(now)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
