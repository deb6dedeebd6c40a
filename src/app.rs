use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::db::{ArticleStore, Repository, TargetStore};
use crate::error::{AppError, Result};
use crate::feed::{FeedCrawler, FeedSource, HttpFeedSource};
use crate::import::{read_sites_file, read_targets_file};
use crate::models::{BiasPair, FeedTarget};
use crate::pairing::{BiasScorer, NamedLock, PairEngine, SqliteLeaseLock};
use crate::retention::{RetentionSweeper, SweepReport};
use crate::services::{ArticleExtractor, HttpArticleExtractor, SiteRegistry};

/// Outcome of one crawl job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub target: String,
    pub extracted: usize,
    pub stored: usize,
    pub pairs: usize,
    /// Articles whose pairing hit a retryable error.
    pub deferred: Vec<i64>,
}

/// Totals of a crawl pass over every crawlable target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub targets: usize,
    pub failed: usize,
    pub articles: usize,
    pub pairs: usize,
    /// Articles still waiting to be paired at the end of the pass.
    pub deferred: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub saved: usize,
    pub skipped: usize,
}

/// Owns the long-lived components and runs the crawl, pair and sweep jobs.
pub struct App {
    config: Config,
    repository: Repository,
    source: Arc<dyn FeedSource>,
    extractor: Arc<dyn ArticleExtractor>,
    crawler: FeedCrawler,
    articles: ArticleStore,
    pairs: PairEngine,
    sweeper: RetentionSweeper,
    /// Stored articles whose pairing is retried on the next pass.
    deferred: Mutex<BTreeSet<i64>>,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let repository = Repository::new(&config.db_path).await?;
        let source = Arc::new(HttpFeedSource::new(
            &config.user_agent,
            config.request_timeout(),
        )?);
        let extractor = Arc::new(HttpArticleExtractor::new(
            &config.user_agent,
            config.request_timeout(),
        )?);

        Self::with_collaborators(config, repository, source, extractor).await
    }

    pub async fn with_collaborators(
        config: &Config,
        repository: Repository,
        source: Arc<dyn FeedSource>,
        extractor: Arc<dyn ArticleExtractor>,
    ) -> Result<Self> {
        let registry = Arc::new(SiteRegistry::load(&repository).await?);
        if registry.is_empty() {
            tracing::warn!("No whitelisted sites yet, articles only get the side of their target");
        }
        let crawler = FeedCrawler::new(
            repository.clone(),
            source.clone(),
            extractor.clone(),
            registry,
            config.allowed_query_params.clone(),
        );

        let lock: Arc<dyn NamedLock> = Arc::new(SqliteLeaseLock::new(
            repository.clone(),
            config.lock_lease(),
            config.lock_wait(),
            config.lock_retry(),
        ));
        let scorer = BiasScorer::new(config.similarity_threshold, config.contradiction_threshold);

        Ok(Self {
            config: config.clone(),
            articles: ArticleStore::new(repository.clone()),
            pairs: PairEngine::new(repository.clone(), lock, scorer),
            sweeper: RetentionSweeper::new(repository.clone(), config.article_max_age()),
            repository,
            source,
            extractor,
            crawler,
            deferred: Mutex::new(BTreeSet::new()),
        })
    }

    /// Crawls one target, stores what it yields and pairs every stored article.
    pub async fn crawl_target(&self, mut target: FeedTarget, limit: Option<usize>) -> Result<CrawlReport> {
        let limit = limit.unwrap_or(self.config.articles_per_target);
        let articles = self.crawler.crawl(&mut target, Some(limit)).await?;

        let mut report = CrawlReport {
            target: target.link.clone(),
            extracted: articles.len(),
            ..Default::default()
        };
        if articles.is_empty() {
            return Ok(report);
        }

        let ids = self.articles.save_many(articles).await?;
        report.stored = ids.len();
        for id in ids {
            match self.pair_stored(id).await {
                Ok(created) => report.pairs += created,
                Err(e) if e.is_retryable() => {
                    tracing::warn!("Pairing of article {} deferred: {}", id, e);
                    report.deferred.push(id);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            "Crawled {}: {} extracted, {} stored, {} pair(s)",
            report.target,
            report.extracted,
            report.stored,
            report.pairs
        );
        Ok(report)
    }

    /// Crawls every enabled target, a few at a time. A failing target is
    /// logged and doesn't stop the others.
    ///
    /// Deferred pairings of this pass and of earlier ones are retried once
    /// every target was crawled. Those still failing wait for the next pass.
    pub async fn crawl_all(&self, limit: Option<usize>) -> Result<PassReport> {
        let targets = self.repository.get_crawlable_targets().await?;
        let total = targets.len();
        tracing::debug!("Crawling {} target(s)", total);

        let reports: Vec<Option<CrawlReport>> = stream::iter(targets)
            .map(|target| async move {
                let link = target.link.clone();
                match self.crawl_target(target, limit).await {
                    Ok(report) => Some(report),
                    Err(e) => {
                        tracing::error!("Failed to crawl {}: {}", link, e);
                        None
                    }
                }
            })
            .buffer_unordered(self.config.concurrent_crawls.max(1))
            .collect()
            .await;

        let mut pass = PassReport {
            targets: total,
            ..Default::default()
        };
        let mut pending = std::mem::take(&mut *self.deferred.lock().await);
        for report in reports {
            match report {
                Some(report) => {
                    pass.articles += report.stored;
                    pass.pairs += report.pairs;
                    pending.extend(report.deferred);
                }
                None => pass.failed += 1,
            }
        }

        if !pending.is_empty() {
            let (created, waiting) = self.retry_deferred(pending).await;
            pass.pairs += created;
            pass.deferred = waiting.len();
            if !waiting.is_empty() {
                tracing::warn!("{} article(s) left unpaired until the next pass", waiting.len());
            }
            self.deferred.lock().await.extend(waiting);
        }
        Ok(pass)
    }

    /// Crawls the stored target with the given link.
    pub async fn crawl_link(&self, link: &str, limit: Option<usize>) -> Result<CrawlReport> {
        let target = self
            .repository
            .get_target_by_link(link)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("target {}", link)))?;

        let mut report = self.crawl_target(target, limit).await?;
        if !report.deferred.is_empty() {
            let pending = std::mem::take(&mut report.deferred).into_iter().collect();
            let (created, waiting) = self.retry_deferred(pending).await;
            report.pairs += created;
            report.deferred = waiting.clone();
            self.deferred.lock().await.extend(waiting);
        }
        Ok(report)
    }

    pub async fn pair_article(&self, article_id: i64) -> Result<usize> {
        self.pairs.pair_article(article_id).await
    }

    /// Pairing run as a follow-up of storing an article. Articles that can
    /// never be paired are logged and count as zero pairs.
    async fn pair_stored(&self, article_id: i64) -> Result<usize> {
        match self.pairs.pair_article(article_id).await {
            Err(e @ AppError::PreconditionFailed(_)) => {
                tracing::warn!("Not pairing article {}: {}", article_id, e);
                Ok(0)
            }
            result => result,
        }
    }

    /// Retries deferred pairings. Returns the pairs created and the articles
    /// still failing with a retryable error.
    async fn retry_deferred(&self, pending: BTreeSet<i64>) -> (usize, Vec<i64>) {
        let mut created = 0;
        let mut waiting = Vec::new();
        for id in pending {
            match self.pair_stored(id).await {
                Ok(pairs) => created += pairs,
                Err(e) if e.is_retryable() => {
                    tracing::debug!("Pairing of article {} still failing: {}", id, e);
                    waiting.push(id);
                }
                Err(e) => tracing::error!("Giving up pairing article {}: {}", id, e),
            }
        }
        (created, waiting)
    }

    /// Ingests a single article page and pairs it. Returns the article's id
    /// and the number of pairs created.
    pub async fn ingest_link(&self, link: &str) -> Result<(i64, usize)> {
        let article = self.crawler.extract_link(link).await?;
        let id = self.articles.save(article).await?;
        let pairs = self.pairs.pair_article(id).await?;
        tracing::info!("Ingested {} as article {} ({} pair(s))", link, id, pairs);
        Ok((id, pairs))
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweeper.sweep().await
    }

    pub async fn latest_pairs(&self, limit: usize) -> Result<Vec<BiasPair>> {
        self.repository.get_latest_pairs(limit).await
    }

    /// Stores the sites of a TOML file and reloads the registry.
    pub async fn import_sites(&mut self, path: &Path) -> Result<usize> {
        let sites = read_sites_file(path)?;
        let saved = self.repository.upsert_sites(sites).await?;

        let registry = Arc::new(SiteRegistry::load(&self.repository).await?);
        self.crawler = FeedCrawler::new(
            self.repository.clone(),
            self.source.clone(),
            self.extractor.clone(),
            registry,
            self.config.allowed_query_params.clone(),
        );
        Ok(saved)
    }

    /// Stores the targets of a TOML file. Known targets are kept as they are
    /// unless `replace` is set, which also resets their checkpoint. The gone
    /// and auth flags found by crawling survive a replace.
    pub async fn import_targets(&self, path: &Path, replace: bool) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        let mut batch = Vec::new();

        for mut target in read_targets_file(path)? {
            if let Some(known) = self.repository.get_target_by_link(&target.link).await? {
                if !replace {
                    tracing::debug!("Target {} already exists", target.link);
                    report.skipped += 1;
                    continue;
                }
                target.gone = known.gone;
                target.auth_required = known.auth_required;
            }
            batch.push(target);
        }

        report.saved = TargetStore::new(self.repository.clone())
            .save_many(batch)
            .await?
            .len();
        Ok(report)
    }

    /// Crawls and sweeps every `refresh_interval_minutes` until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        let period = Duration::from_secs(u64::from(self.config.refresh_interval_minutes.max(1)) * 60);
        let mut interval = tokio::time::interval(period);
        tracing::info!("Refreshing every {} minute(s)", period.as_secs() / 60);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.crawl_all(None).await {
                        Ok(pass) => tracing::info!(
                            "Crawl pass done: {} target(s), {} failed, {} article(s), {} pair(s), {} deferred",
                            pass.targets, pass.failed, pass.articles, pass.pairs, pass.deferred
                        ),
                        Err(e) => tracing::error!("Crawl pass failed: {}", e),
                    }
                    if let Err(e) = self.sweep().await {
                        tracing::error!("Sweep failed: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down");
                    return Ok(());
                }
            }
        }
    }
}
