use std::collections::HashSet;
use std::sync::Arc;

use crate::db::{PairWrite, Repository};
use crate::error::{AppError, Result};
use crate::models::{Article, NewBiasPair};

use super::lock::{Lease, NamedLock};
use super::scorer::BiasScorer;

/// Name of the lock serializing pair writes between two articles. Either
/// argument order maps to the same name.
pub fn pair_lock_name(a: i64, b: i64) -> String {
    format!("bias-pair:{}:{}", a.min(b), a.max(b))
}

/// Links an article with every stored article covering the same topic from
/// an opposing side.
pub struct PairEngine {
    repository: Repository,
    lock: Arc<dyn NamedLock>,
    scorer: BiasScorer,
}

impl PairEngine {
    pub fn new(repository: Repository, lock: Arc<dyn NamedLock>, scorer: BiasScorer) -> Self {
        Self {
            repository,
            lock,
            scorer,
        }
    }

    /// Returns how many pairs were created (or refreshed) for the article.
    ///
    /// An article that was removed in the meantime yields zero pairs. One
    /// without a side is rejected with `PreconditionFailed`.
    pub async fn pair_article(&self, article_id: i64) -> Result<usize> {
        let Some(main) = self.repository.get_article(article_id).await? else {
            tracing::debug!("Article {} no longer exists, nothing to pair", article_id);
            return Ok(0);
        };
        if main.side.is_none() {
            return Err(AppError::PreconditionFailed(format!(
                "article {} ({}) has no side",
                article_id, main.link
            )));
        }

        let candidates = self.candidates(&main).await?;
        tracing::debug!(
            "Scoring {} candidate(s) for article {}",
            candidates.len(),
            article_id
        );

        let mut created = 0;
        for candidate in &candidates {
            if !self.scorer.score(&main, candidate).eligible {
                continue;
            }
            if self.store_pair(&main, candidate).await? {
                created += 1;
            }
        }

        if created > 0 {
            tracing::info!("Created {} bias pair(s) for article {}", created, main.link);
        }
        Ok(created)
    }

    /// Articles sharing at least one keyword with `main`, from other sources.
    async fn candidates(&self, main: &Article) -> Result<Vec<Article>> {
        let main_source = main.short_source();
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for keyword in &main.keywords {
            for article in self.repository.get_articles_with_keyword(keyword).await? {
                if article.id == main.id
                    || article.link == main.link
                    || article.short_source() == main_source
                    || !seen.insert(article.id)
                {
                    continue;
                }
                if article.side.is_none() {
                    tracing::warn!("Skipping candidate {} without a side", article.link);
                    continue;
                }
                candidates.push(article);
            }
        }
        Ok(candidates)
    }

    /// Replaces the pair between the two articles while holding their lock.
    async fn store_pair(&self, main: &Article, candidate: &Article) -> Result<bool> {
        let (Some(main_id), Some(candidate_id)) = (main.id, candidate.id) else {
            return Ok(false);
        };
        let name = pair_lock_name(main_id, candidate_id);
        let lease = self.lock.acquire(&name).await?;

        let written = self.write_pair(main, candidate_id, &lease).await;
        if let Err(e) = self.lock.release(lease).await {
            // The lease expires on its own.
            tracing::warn!("Failed to release lock {}: {}", name, e);
        }

        match written? {
            Some(PairWrite::Stored { id, replaced }) => {
                tracing::debug!("Stored bias pair {} under {} ({} replaced)", id, name, replaced);
                Ok(true)
            }
            Some(PairWrite::ArticleMissing) => {
                tracing::debug!("Pair under {} lost an article to cleanup", name);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Scores `main` against the candidate as stored now, since another job
    /// may have updated it while the lock was awaited, and writes the pair.
    async fn write_pair(
        &self,
        main: &Article,
        candidate_id: i64,
        lease: &Lease,
    ) -> Result<Option<PairWrite>> {
        let Some(candidate) = self.repository.get_article(candidate_id).await? else {
            tracing::debug!("Candidate {} was removed before pairing", candidate_id);
            return Ok(None);
        };
        let score = self.scorer.score(main, &candidate);
        if !score.eligible {
            tracing::debug!("Candidate {} no longer pairs with {}", candidate.link, main.link);
            return Ok(None);
        }
        let Some(pair) = NewBiasPair::between(main, &candidate, score.value) else {
            return Ok(None);
        };

        // Reading took time out of the lease.
        self.lock.renew(lease).await?;
        self.repository
            .replace_bias_pair(pair, Some(lease.check()))
            .await
            .map(Some)
    }
}
