use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};

use crate::error::Result;
use crate::models::{Article, Side};

use super::dedup::DedupRecord;
use super::repository::{datetime_column, format_datetime, side_column};
use super::Repository;

const ARTICLE_COLUMNS: &str = "a.id, a.source_name, a.link, a.title, a.content, a.summary, a.authors, a.published, a.image, a.keywords, a.side, a.created_at";

impl Repository {
    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let article = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM articles a WHERE a.id = ?1",
                    ARTICLE_COLUMNS
                ))?;
                let article = stmt.query_row(params![id], article_from_row).optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    /// All stored articles tagged with `keyword`.
    pub async fn get_articles_with_keyword(&self, keyword: &str) -> Result<Vec<Article>> {
        let keyword = keyword.to_string();
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {} FROM articles a
                       JOIN article_keywords k ON k.article_id = a.id
                       WHERE k.keyword = ?1"#,
                    ARTICLE_COLUMNS
                ))?;
                let articles = stmt
                    .query_map(params![keyword], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    #[cfg(test)]
    pub async fn count_articles(&self) -> Result<usize> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count as usize)
    }

    /// Articles published before `cutoff`, or never dated and created before it.
    pub async fn get_stale_article_ids(&self, cutoff: DateTime<Utc>) -> Result<Vec<i64>> {
        let cutoff = format_datetime(cutoff);
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id FROM articles
                       WHERE published < ?1
                          OR (published IS NULL AND created_at < ?1)
                       ORDER BY id"#,
                )?;
                let ids = stmt
                    .query_map(params![cutoff], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<i64>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    /// Deletes the given articles and every bias pair referencing them, pairs
    /// first. Returns `(articles_removed, pairs_removed)`.
    pub async fn remove_articles(&self, ids: Vec<i64>) -> Result<(usize, usize)> {
        if ids.is_empty() {
            return Ok((0, 0));
        }

        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut pairs = 0;
                let mut articles = 0;
                for id in &ids {
                    pairs += tx.execute(
                        "DELETE FROM bias_pairs WHERE left_id = ?1 OR right_id = ?1",
                        params![id],
                    )?;
                    tx.execute("DELETE FROM article_keywords WHERE article_id = ?1", params![id])?;
                    articles += tx.execute("DELETE FROM articles WHERE id = ?1", params![id])?;
                }
                tx.commit()?;
                Ok((articles, pairs))
            })
            .await?;
        Ok(removed)
    }
}

impl DedupRecord for Article {
    const TABLE: &'static str = "articles";
    const KEY_COLUMN: &'static str = "link";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn dedup_key(&self) -> &str {
        &self.link
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn insert(&self, tx: &Transaction) -> rusqlite::Result<i64> {
        tx.execute(
            r#"INSERT INTO articles (source_name, link, title, content, summary, authors,
                                     published, image, keywords, side, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                self.source_name,
                self.link,
                self.title,
                self.content,
                self.summary,
                to_json(&self.authors),
                self.published.map(format_datetime),
                self.image,
                to_json(&self.keywords),
                self.side.map(Side::value),
                format_datetime(self.created_at),
            ],
        )?;
        let id = tx.last_insert_rowid();
        write_keywords(tx, id, &self.keywords)?;
        Ok(id)
    }

    fn overwrite(&self, tx: &Transaction, id: i64, created_at: DateTime<Utc>) -> rusqlite::Result<()> {
        tx.execute(
            r#"UPDATE articles SET source_name = ?1, link = ?2, title = ?3, content = ?4,
                   summary = ?5, authors = ?6, published = ?7, image = ?8, keywords = ?9,
                   side = ?10, created_at = ?11
               WHERE id = ?12"#,
            params![
                self.source_name,
                self.link,
                self.title,
                self.content,
                self.summary,
                to_json(&self.authors),
                self.published.map(format_datetime),
                self.image,
                to_json(&self.keywords),
                self.side.map(Side::value),
                format_datetime(created_at),
                id,
            ],
        )?;
        tx.execute("DELETE FROM article_keywords WHERE article_id = ?1", params![id])?;
        write_keywords(tx, id, &self.keywords)
    }
}

fn write_keywords(tx: &Transaction, id: i64, keywords: &BTreeSet<String>) -> rusqlite::Result<()> {
    let mut stmt =
        tx.prepare_cached("INSERT INTO article_keywords (article_id, keyword) VALUES (?1, ?2)")?;
    for keyword in keywords {
        stmt.execute(params![id, keyword])?;
    }
    Ok(())
}

pub(super) fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

pub(super) fn from_json<T: serde::de::DeserializeOwned + Default>(raw: &str) -> T {
    serde_json::from_str(raw).unwrap_or_default()
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: Some(row.get(0)?),
        source_name: row.get(1)?,
        link: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        summary: row.get(5)?,
        authors: from_json(&row.get::<_, String>(6)?),
        published: datetime_column(row, 7)?,
        image: row.get(8)?,
        keywords: from_json(&row.get::<_, String>(9)?),
        side: side_column(row, 10)?,
        created_at: datetime_column(row, 11)?.unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::db::repository::tests::temp_repository;
    use crate::db::ArticleStore;

    #[tokio::test]
    async fn test_article_round_trip_and_keyword_index() {
        let (_dir, repo) = temp_repository().await;
        let store = ArticleStore::new(repo.clone());
        let published = Utc.with_ymd_and_hms(2024, 2, 1, 8, 30, 0).unwrap();

        let mut article = Article::new("Fox News - Politics", "https://foxnews.com/a")
            .with_keywords(["Tax", "trump"])
            .with_side(Some(Side::RIGHT))
            .with_published(Some(published));
        article.authors = vec!["Jane Doe".into(), "John Roe".into()];
        article.image = Some("https://foxnews.com/a.jpg".into());
        let id = store.save(article).await.unwrap();

        let stored = repo.get_article(id).await.unwrap().unwrap();
        assert_eq!(stored.authors, vec!["Jane Doe", "John Roe"]);
        assert_eq!(stored.published, Some(published));
        assert_eq!(stored.side, Some(Side::RIGHT));
        assert!(stored.keywords.contains("tax"));

        let by_tax = repo.get_articles_with_keyword("tax").await.unwrap();
        assert_eq!(by_tax.len(), 1);
        assert!(repo.get_articles_with_keyword("Tax").await.unwrap().is_empty());

        // Updating replaces the keyword index.
        let updated = stored.clone().with_keywords(["economy"]);
        store.save(updated).await.unwrap();
        assert!(repo.get_articles_with_keyword("tax").await.unwrap().is_empty());
        assert_eq!(repo.get_articles_with_keyword("economy").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_articles() {
        let (_dir, repo) = temp_repository().await;
        let store = ArticleStore::new(repo.clone());
        let now = Utc::now();
        let cutoff = now - Duration::days(2);

        let old = Article::new("A", "https://a.com/old").with_published(Some(now - Duration::days(3)));
        let fresh = Article::new("A", "https://a.com/fresh").with_published(Some(now - Duration::hours(1)));
        let mut undated_old = Article::new("A", "https://a.com/undated-old");
        undated_old.created_at = now - Duration::days(5);
        let undated_new = Article::new("A", "https://a.com/undated-new");

        let old_id = store.save(old).await.unwrap();
        store.save(fresh).await.unwrap();
        let undated_old_id = store.save(undated_old).await.unwrap();
        store.save(undated_new).await.unwrap();

        let stale = repo.get_stale_article_ids(cutoff).await.unwrap();
        assert_eq!(stale, vec![old_id, undated_old_id]);
    }
}
