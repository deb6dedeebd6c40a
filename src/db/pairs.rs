use chrono::Utc;
use rusqlite::{params, Row, TransactionBehavior};

use crate::error::{AppError, Result};
use crate::models::{BiasPair, NewBiasPair};

use super::articles::{from_json, to_json};
use super::leases::{lease_is_held, LeaseCheck};
use super::repository::{datetime_column, format_datetime};
use super::Repository;

/// Outcome of writing a bias pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairWrite {
    /// The pair was stored, after removing `replaced` older pairs of the same
    /// two articles.
    Stored { id: i64, replaced: usize },
    /// One of the articles no longer exists.
    ArticleMissing,
}

const PAIR_COLUMNS: &str = "id, left_id, right_id, score, published, keywords, created_at";

impl Repository {
    /// Replaces any pair between the two articles (in either orientation) with
    /// `pair`, in one transaction.
    ///
    /// With a `lease`, the write only happens while that lease is still held.
    pub async fn replace_bias_pair(
        &self,
        pair: NewBiasPair,
        lease: Option<LeaseCheck>,
    ) -> Result<PairWrite> {
        let lock_name = lease.as_ref().map(|l| l.name.clone());
        let written = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                if let Some(lease) = &lease {
                    if !lease_is_held(&tx, lease)? {
                        return Ok(None);
                    }
                }

                let present: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM articles WHERE id IN (?1, ?2)",
                    params![pair.left, pair.right],
                    |row| row.get(0),
                )?;
                if present < 2 {
                    return Ok(Some(PairWrite::ArticleMissing));
                }

                let replaced = tx.execute(
                    r#"DELETE FROM bias_pairs
                       WHERE (left_id = ?1 AND right_id = ?2)
                          OR (left_id = ?2 AND right_id = ?1)"#,
                    params![pair.left, pair.right],
                )?;
                tx.execute(
                    r#"INSERT INTO bias_pairs (left_id, right_id, score, published, keywords, created_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                    params![
                        pair.left,
                        pair.right,
                        pair.score,
                        pair.published.map(format_datetime),
                        to_json(&pair.keywords),
                        format_datetime(Utc::now()),
                    ],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(Some(PairWrite::Stored { id, replaced }))
            })
            .await?;

        written.ok_or_else(|| AppError::LockLost(lock_name.unwrap_or_default()))
    }

    /// Pairs involving the given article, on either side.
    #[cfg(test)]
    pub async fn get_pairs_for_article(&self, article_id: i64) -> Result<Vec<BiasPair>> {
        let pairs = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM bias_pairs WHERE left_id = ?1 OR right_id = ?1 ORDER BY id",
                    PAIR_COLUMNS
                ))?;
                let pairs = stmt
                    .query_map(params![article_id], pair_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(pairs)
            })
            .await?;
        Ok(pairs)
    }

    /// Most recently published pairs first.
    pub async fn get_latest_pairs(&self, limit: usize) -> Result<Vec<BiasPair>> {
        let pairs = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM bias_pairs ORDER BY published DESC NULLS LAST, created_at DESC LIMIT ?1",
                    PAIR_COLUMNS
                ))?;
                let pairs = stmt
                    .query_map(params![limit as i64], pair_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(pairs)
            })
            .await?;
        Ok(pairs)
    }

    #[cfg(test)]
    pub async fn count_pairs(&self) -> Result<usize> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM bias_pairs", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count as usize)
    }
}

fn pair_from_row(row: &Row) -> rusqlite::Result<BiasPair> {
    Ok(BiasPair {
        id: row.get(0)?,
        left: row.get(1)?,
        right: row.get(2)?,
        score: row.get(3)?,
        published: datetime_column(row, 4)?,
        keywords: from_json(&row.get::<_, String>(5)?),
        created_at: datetime_column(row, 6)?.unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::db::repository::tests::temp_repository;
    use crate::db::ArticleStore;
    use crate::models::{Article, Side};

    async fn saved(store: &ArticleStore, link: &str, side: Side) -> Article {
        let mut article = Article::new("S", link).with_side(Some(side));
        article.id = Some(store.save(article.clone()).await.unwrap());
        article
    }

    #[tokio::test]
    async fn test_replace_removes_both_orientations() {
        let (_dir, repo) = temp_repository().await;
        let store = ArticleStore::new(repo.clone());
        let a = saved(&store, "https://a.com/1", Side::LEFT).await;
        let b = saved(&store, "https://b.com/1", Side::RIGHT).await;

        let reversed = NewBiasPair {
            left: b.id.unwrap(),
            right: a.id.unwrap(),
            score: 0.6,
            published: None,
            keywords: BTreeSet::new(),
        };
        repo.replace_bias_pair(reversed, None).await.unwrap();

        let pair = NewBiasPair::between(&a, &b, 0.9).unwrap();
        let write = repo.replace_bias_pair(pair, None).await.unwrap();
        assert!(matches!(write, PairWrite::Stored { replaced: 1, .. }));

        let pairs = repo.get_pairs_for_article(a.id.unwrap()).await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].left, a.id.unwrap());
        assert_eq!(pairs[0].score, 0.9);
    }

    #[tokio::test]
    async fn test_missing_article_is_reported() {
        let (_dir, repo) = temp_repository().await;
        let store = ArticleStore::new(repo.clone());
        let a = saved(&store, "https://a.com/1", Side::LEFT).await;
        let b = saved(&store, "https://b.com/1", Side::RIGHT).await;
        repo.remove_articles(vec![b.id.unwrap()]).await.unwrap();

        let pair = NewBiasPair::between(&a, &b, 0.9).unwrap();
        let write = repo.replace_bias_pair(pair, None).await.unwrap();
        assert_eq!(write, PairWrite::ArticleMissing);
        assert_eq!(repo.count_pairs().await.unwrap(), 0);
    }
}
