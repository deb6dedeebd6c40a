use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{FeedTarget, Side, Site};

use super::dedup::DedupRecord;
use super::schema::SCHEMA;

/// Handle to the SQLite database shared by every component.
///
/// Cloning is cheap: clones talk to the same background connection.
#[derive(Clone)]
pub struct Repository {
    pub(super) conn: Connection,
}

const TARGET_COLUMNS: &str = "id, source_name, link, site, last_modified, etag, enabled, gone, auth_required, side, created_at";

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Feed target operations

    #[cfg(test)]
    pub async fn get_target(&self, id: i64) -> Result<Option<FeedTarget>> {
        let target = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM feed_targets WHERE id = ?1",
                    TARGET_COLUMNS
                ))?;
                let target = stmt.query_row(params![id], target_from_row).optional()?;
                Ok(target)
            })
            .await?;
        Ok(target)
    }

    pub async fn get_target_by_link(&self, link: &str) -> Result<Option<FeedTarget>> {
        let link = link.to_string();
        let target = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM feed_targets WHERE link = ?1 ORDER BY id LIMIT 1",
                    TARGET_COLUMNS
                ))?;
                let target = stmt.query_row(params![link], target_from_row).optional()?;
                Ok(target)
            })
            .await?;
        Ok(target)
    }

    #[cfg(test)]
    pub async fn get_all_targets(&self) -> Result<Vec<FeedTarget>> {
        self.query_targets("").await
    }

    /// Enabled targets that are neither gone nor waiting for authentication.
    pub async fn get_crawlable_targets(&self) -> Result<Vec<FeedTarget>> {
        self.query_targets("WHERE enabled = 1 AND gone = 0 AND auth_required = 0")
            .await
    }

    async fn query_targets(&self, filter: &'static str) -> Result<Vec<FeedTarget>> {
        let targets = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM feed_targets {} ORDER BY source_name",
                    TARGET_COLUMNS, filter
                ))?;
                let targets = stmt
                    .query_map([], target_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(targets)
            })
            .await?;
        Ok(targets)
    }

    /// Records how far the target was crawled.
    pub async fn update_target_checkpoint(
        &self,
        id: i64,
        last_modified: Option<DateTime<Utc>>,
        etag: Option<String>,
    ) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE feed_targets SET last_modified = ?1, etag = ?2 WHERE id = ?3",
                    params![last_modified.map(format_datetime), etag, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn mark_target_gone(&self, id: i64) -> Result<()> {
        self.execute_on_target("UPDATE feed_targets SET gone = 1 WHERE id = ?1", id)
            .await
    }

    pub async fn mark_target_auth_required(&self, id: i64) -> Result<()> {
        self.execute_on_target("UPDATE feed_targets SET auth_required = 1 WHERE id = ?1", id)
            .await
    }

    pub async fn update_target_link(&self, id: i64, link: &str) -> Result<()> {
        let link = link.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE feed_targets SET link = ?1 WHERE id = ?2",
                    params![link, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn execute_on_target(&self, sql: &'static str, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(sql, params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Site operations

    pub async fn get_all_sites(&self) -> Result<Vec<Site>> {
        let sites = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT site, side, publisher, source FROM sites ORDER BY site")?;
                let sites = stmt
                    .query_map([], site_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(sites)
            })
            .await?;
        Ok(sites.into_iter().flatten().collect())
    }

    /// Adds or replaces the given sites, keyed by their normalized domain.
    pub async fn upsert_sites(&self, sites: Vec<Site>) -> Result<usize> {
        let count = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for site in &sites {
                    tx.execute(
                        r#"INSERT INTO sites (site, side, publisher, source)
                           VALUES (?1, ?2, ?3, ?4)
                           ON CONFLICT(site) DO UPDATE SET
                               side = excluded.side,
                               publisher = excluded.publisher,
                               source = excluded.source"#,
                        params![site.site, site.side.value(), site.publisher, site.source],
                    )?;
                }
                tx.commit()?;
                Ok(sites.len())
            })
            .await?;
        Ok(count)
    }
}

impl DedupRecord for FeedTarget {
    const TABLE: &'static str = "feed_targets";
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
            r#"INSERT INTO feed_targets (source_name, link, site, last_modified, etag,
                                         enabled, gone, auth_required, side, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            params![
                self.source_name,
                self.link,
                self.site,
                self.last_modified.map(format_datetime),
                self.etag,
                self.enabled,
                self.gone,
                self.auth_required,
                self.side.map(Side::value),
                format_datetime(self.created_at),
            ],
        )?;
        Ok(tx.last_insert_rowid())
    }

    fn overwrite(&self, tx: &Transaction, id: i64, created_at: DateTime<Utc>) -> rusqlite::Result<()> {
        tx.execute(
            r#"UPDATE feed_targets SET source_name = ?1, link = ?2, site = ?3, last_modified = ?4,
                   etag = ?5, enabled = ?6, gone = ?7, auth_required = ?8, side = ?9, created_at = ?10
               WHERE id = ?11"#,
            params![
                self.source_name,
                self.link,
                self.site,
                self.last_modified.map(format_datetime),
                self.etag,
                self.enabled,
                self.gone,
                self.auth_required,
                self.side.map(Side::value),
                format_datetime(created_at),
                id,
            ],
        )?;
        Ok(())
    }
}

/// Formats a timestamp the way every column stores it. Second precision in
/// UTC keeps lexical and chronological order identical.
pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

pub(super) fn datetime_column(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

pub(super) fn side_column(row: &Row, idx: usize) -> rusqlite::Result<Option<Side>> {
    Ok(row.get::<_, Option<i8>>(idx)?.and_then(Side::new))
}

fn target_from_row(row: &Row) -> rusqlite::Result<FeedTarget> {
    Ok(FeedTarget {
        id: Some(row.get(0)?),
        source_name: row.get(1)?,
        link: row.get(2)?,
        site: row.get(3)?,
        last_modified: datetime_column(row, 4)?,
        etag: row.get(5)?,
        enabled: row.get(6)?,
        gone: row.get(7)?,
        auth_required: row.get(8)?,
        side: side_column(row, 9)?,
        created_at: datetime_column(row, 10)?.unwrap_or_else(Utc::now),
    })
}

fn site_from_row(row: &Row) -> rusqlite::Result<Option<Site>> {
    let site: String = row.get(0)?;
    let Some(side) = side_column(row, 1)? else {
        tracing::warn!("Ignoring site {} with an invalid side", site);
        return Ok(None);
    };
    Ok(Some(Site {
        site,
        side,
        publisher: row.get(2)?,
        source: row.get(3)?,
    }))
}
