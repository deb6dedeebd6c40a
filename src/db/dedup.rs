//! Insert-or-update keyed by a domain field rather than by storage identity.
//!
//! Every save runs in an IMMEDIATE transaction: SQLite hands out its write
//! lock before the duplicate lookup, so two writers of the same key cannot
//! both observe "no duplicate" and both insert.

use std::collections::HashMap;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction, TransactionBehavior};

use crate::error::{AppError, Result};
use crate::models::{Article, FeedTarget};

use super::Repository;

/// A record stored at most once per `dedup_key`.
pub trait DedupRecord: Send + 'static {
    const TABLE: &'static str;
    const KEY_COLUMN: &'static str;

    /// Storage identity, once persisted.
    fn id(&self) -> Option<i64>;
    fn dedup_key(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;

    fn insert(&self, tx: &Transaction) -> rusqlite::Result<i64>;

    /// Replaces every field of row `id` with this record's values.
    fn overwrite(&self, tx: &Transaction, id: i64, created_at: DateTime<Utc>) -> rusqlite::Result<()>;
}

pub type ArticleStore = Store<Article>;
pub type TargetStore = Store<FeedTarget>;

/// More than one stored row found for a key.
struct Duplicate {
    key: String,
    count: usize,
}

impl From<Duplicate> for AppError {
    fn from(dup: Duplicate) -> Self {
        AppError::DuplicateEntity {
            key: dup.key,
            count: dup.count,
        }
    }
}

/// Deduplicating save layer over one kind of record.
pub struct Store<T> {
    repository: Repository,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            _record: PhantomData,
        }
    }
}

impl<T: DedupRecord> Store<T> {
    pub fn new(repository: Repository) -> Self {
        Self {
            repository,
            _record: PhantomData,
        }
    }

    /// Saves `record` and returns its storage identity.
    ///
    /// A record sharing its key with a stored one updates that row in place:
    /// the row keeps its identity, gets every field of `record` and a fresh
    /// `created_at`.
    pub async fn save(&self, record: T) -> Result<i64> {
        let outcome = self
            .repository
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let outcome = upsert(&tx, &record)?;
                if outcome.is_ok() {
                    tx.commit()?;
                }
                Ok(outcome)
            })
            .await?;

        Ok(outcome?)
    }

    /// Saves a batch atomically. The batch is first collapsed by key, the last
    /// occurrence of a key winning, so it never inserts duplicates of itself.
    ///
    /// Returns one identity per distinct key, in order of first appearance.
    pub async fn save_many(&self, records: Vec<T>) -> Result<Vec<i64>> {
        let records = collapse_by_key(records);
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let outcome = self
            .repository
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut ids = Vec::with_capacity(records.len());
                for record in &records {
                    match upsert(&tx, record)? {
                        Ok(id) => ids.push(id),
                        Err(duplicate) => return Ok(Err(duplicate)),
                    }
                }
                tx.commit()?;
                Ok(Ok(ids))
            })
            .await?;

        Ok(outcome?)
    }
}

fn collapse_by_key<T: DedupRecord>(records: Vec<T>) -> Vec<T> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut collapsed: Vec<T> = Vec::with_capacity(records.len());
    for record in records {
        match positions.get(record.dedup_key()) {
            Some(&pos) => collapsed[pos] = record,
            None => {
                positions.insert(record.dedup_key().to_string(), collapsed.len());
                collapsed.push(record);
            }
        }
    }
    collapsed
}

fn upsert<T: DedupRecord>(
    tx: &Transaction,
    record: &T,
) -> rusqlite::Result<std::result::Result<i64, Duplicate>> {
    let key = record.dedup_key();
    let ids = ids_by_key(tx, T::TABLE, T::KEY_COLUMN, key)?;

    // Saving an already stored record overwrites it, unless another row
    // already owns the key.
    if let Some(own_id) = record.id() {
        if row_exists(tx, T::TABLE, own_id)? {
            let others = ids.iter().filter(|id| **id != own_id).count();
            if others > 0 {
                return Ok(Err(Duplicate {
                    key: key.to_string(),
                    count: others + 1,
                }));
            }
            record.overwrite(tx, own_id, record.created_at())?;
            return Ok(Ok(own_id));
        }
    }

    match ids.as_slice() {
        [] => Ok(Ok(record.insert(tx)?)),
        [id] => {
            tracing::debug!("Updating already existing {} row for {}", T::TABLE, key);
            record.overwrite(tx, *id, Utc::now())?;
            Ok(Ok(*id))
        }
        _ => Ok(Err(Duplicate {
            key: key.to_string(),
            count: ids.len(),
        })),
    }
}

fn ids_by_key(
    tx: &Transaction,
    table: &str,
    column: &str,
    key: &str,
) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = tx.prepare(&format!("SELECT id FROM {} WHERE {} = ?1", table, column))?;
    let ids = stmt
        .query_map(params![key], |row| row.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(ids)
}

fn row_exists(tx: &Transaction, table: &str, id: i64) -> rusqlite::Result<bool> {
    let count: i64 = tx.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE id = ?1", table),
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::db::repository::tests::temp_repository;
    use crate::models::Side;

    fn article(link: &str, title: &str) -> Article {
        let mut article = Article::new("BBC - World", link)
            .with_keywords(["tax"])
            .with_side(Some(Side::LEFT_CENTER));
        article.title = title.to_string();
        article
    }

    #[tokio::test]
    async fn test_save_inserts_then_updates_in_place() {
        let (_dir, repo) = temp_repository().await;
        let store = ArticleStore::new(repo.clone());

        let mut first = article("https://bbc.co.uk/a", "First");
        first.created_at = Utc::now() - Duration::days(1);
        let id = store.save(first.clone()).await.unwrap();

        let second = article("https://bbc.co.uk/a", "Second");
        let second_id = store.save(second).await.unwrap();
        assert_eq!(id, second_id);

        let stored = repo.get_article(id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Second");
        assert!(stored.created_at > first.created_at);
        assert_eq!(repo.count_articles().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_save_persisted_record_overwrites_itself() {
        let (_dir, repo) = temp_repository().await;
        let store = ArticleStore::new(repo.clone());

        let id = store.save(article("https://bbc.co.uk/a", "First")).await.unwrap();
        let mut stored = repo.get_article(id).await.unwrap().unwrap();
        let created_at = stored.created_at;
        stored.title = "Edited".into();

        assert_eq!(store.save(stored).await.unwrap(), id);
        let reloaded = repo.get_article(id).await.unwrap().unwrap();
        assert_eq!(reloaded.title, "Edited");
        assert_eq!(reloaded.created_at, created_at);
    }

    #[tokio::test]
    async fn test_save_many_collapses_batch() {
        let (_dir, repo) = temp_repository().await;
        let store = ArticleStore::new(repo.clone());

        let ids = store
            .save_many(vec![
                article("https://bbc.co.uk/a", "A1"),
                article("https://bbc.co.uk/b", "B"),
                article("https://bbc.co.uk/a", "A2"),
            ])
            .await
            .unwrap();

        assert_eq!(ids.len(), 2);
        assert_eq!(repo.count_articles().await.unwrap(), 2);
        let a = repo.get_article(ids[0]).await.unwrap().unwrap();
        assert_eq!(a.title, "A2");
    }

    #[tokio::test]
    async fn test_duplicate_rows_are_reported() {
        let (_dir, repo) = temp_repository().await;
        let store = ArticleStore::new(repo.clone());

        // Bypass the store to plant a duplicate.
        repo.conn
            .call(|conn| {
                let tx = conn.transaction()?;
                article("https://bbc.co.uk/a", "X").insert(&tx)?;
                article("https://bbc.co.uk/a", "Y").insert(&tx)?;
                tx.commit()?;
                Ok(())
            })
            .await
            .unwrap();

        let err = store
            .save(article("https://bbc.co.uk/a", "Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateEntity { count: 2, .. }));

        let err = store
            .save_many(vec![article("https://bbc.co.uk/new", "N"), article("https://bbc.co.uk/a", "Z")])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateEntity { .. }));
        // The failed batch leaves nothing behind.
        assert_eq!(repo.count_articles().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_saves_of_same_link() {
        let (dir, repo) = temp_repository().await;
        let path = dir.path().join("test.db");
        let other = Repository::new(path.to_str().unwrap()).await.unwrap();

        let a = ArticleStore::new(repo.clone());
        let b = ArticleStore::new(other);
        let saves = (0..8).map(|i| {
            let store = if i % 2 == 0 { a.clone() } else { b.clone() };
            async move { store.save(article("https://bbc.co.uk/race", "R")).await }
        });
        let ids = futures::future::join_all(saves).await;

        let ids: Vec<i64> = ids.into_iter().map(|r| r.unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(repo.count_articles().await.unwrap(), 1);
    }
}
