use chrono::Utc;
use serde::Serialize;

use crate::db::Repository;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub articles_removed: usize,
    pub pairs_removed: usize,
}

/// Evicts articles older than `max_age`, along with every pair touching them.
pub struct RetentionSweeper {
    repository: Repository,
    max_age: chrono::Duration,
}

impl RetentionSweeper {
    pub fn new(repository: Repository, max_age: chrono::Duration) -> Self {
        Self { repository, max_age }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        let cutoff = Utc::now() - self.max_age;
        let stale = self.repository.get_stale_article_ids(cutoff).await?;
        if stale.is_empty() {
            tracing::debug!("No articles older than {}", cutoff);
            return Ok(SweepReport::default());
        }

        let (articles_removed, pairs_removed) = self.repository.remove_articles(stale).await?;
        tracing::info!(
            "Swept {} article(s) and {} pair(s) older than {}",
            articles_removed,
            pairs_removed,
            cutoff
        );
        Ok(SweepReport {
            articles_removed,
            pairs_removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::db::{temp_repository, ArticleStore};
    use crate::models::{Article, NewBiasPair, Side};

    async fn save(store: &ArticleStore, link: &str, side: Side, age_days: Option<i64>) -> Article {
        let published = age_days.map(|days| Utc::now() - Duration::days(days));
        let mut article = Article::new(link, link)
            .with_side(Some(side))
            .with_published(published);
        article.id = Some(store.save(article.clone()).await.unwrap());
        article
    }

    async fn pair(repo: &Repository, a: &Article, b: &Article) {
        let pair = NewBiasPair::between(a, b, 0.9).unwrap();
        repo.replace_bias_pair(pair, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_articles_and_their_pairs() {
        let (_dir, repo) = temp_repository().await;
        let store = ArticleStore::new(repo.clone());

        let old = save(&store, "https://a.com/old", Side::LEFT, Some(5)).await;
        let fresh_left = save(&store, "https://a.com/fresh", Side::LEFT, Some(0)).await;
        let fresh_right = save(&store, "https://b.com/fresh", Side::RIGHT, Some(1)).await;
        let undated = save(&store, "https://b.com/undated", Side::RIGHT, None).await;

        pair(&repo, &old, &fresh_right).await;
        pair(&repo, &fresh_left, &fresh_right).await;
        pair(&repo, &fresh_left, &undated).await;

        let sweeper = RetentionSweeper::new(repo.clone(), Duration::days(2));
        let report = sweeper.sweep().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                articles_removed: 1,
                pairs_removed: 1
            }
        );

        assert!(repo.get_article(old.id.unwrap()).await.unwrap().is_none());
        assert_eq!(repo.count_articles().await.unwrap(), 3);
        let remaining = repo.get_pairs_for_article(fresh_left.id.unwrap()).await.unwrap();
        assert_eq!(remaining.len(), 2);

        // Nothing left to do.
        assert_eq!(sweeper.sweep().await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn test_undated_articles_age_by_creation() {
        let (_dir, repo) = temp_repository().await;
        let store = ArticleStore::new(repo.clone());
        let undated = save(&store, "https://a.com/undated", Side::LEFT, None).await;
        let dated = save(&store, "https://a.com/dated", Side::LEFT, Some(1)).await;

        // Everything created before now is stale under a negative age.
        let report = RetentionSweeper::new(repo.clone(), Duration::seconds(-5))
            .sweep()
            .await
            .unwrap();
        assert_eq!(report.articles_removed, 2);
        assert!(repo.get_article(undated.id.unwrap()).await.unwrap().is_none());
        assert!(repo.get_article(dated.id.unwrap()).await.unwrap().is_none());
    }
}
