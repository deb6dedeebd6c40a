use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Transaction};

use crate::error::Result;

use super::Repository;

/// Identifies a lease that a write must still hold to go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseCheck {
    pub name: String,
    pub holder: String,
}

// Millisecond precision: leases may be much shorter than a second in tests.
fn lease_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn expiry(lease: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(30))
}

impl Repository {
    /// Takes the named lease for `holder` if it is free or expired.
    pub async fn try_acquire_lease(&self, name: &str, holder: &str, lease: Duration) -> Result<bool> {
        let (name, holder) = (name.to_string(), holder.to_string());
        let acquired = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"INSERT INTO leases (name, holder, expires_at) VALUES (?1, ?2, ?3)
                       ON CONFLICT(name) DO UPDATE SET
                           holder = excluded.holder,
                           expires_at = excluded.expires_at
                       WHERE leases.expires_at <= ?4"#,
                    params![name, holder, lease_time(expiry(lease)), lease_time(Utc::now())],
                )?;
                Ok(changed == 1)
            })
            .await?;
        Ok(acquired)
    }

    /// Extends a lease still held by `holder`. Returns false if it was lost.
    pub async fn renew_lease(&self, name: &str, holder: &str, lease: Duration) -> Result<bool> {
        let (name, holder) = (name.to_string(), holder.to_string());
        let renewed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE leases SET expires_at = ?1
                       WHERE name = ?2 AND holder = ?3 AND expires_at > ?4"#,
                    params![lease_time(expiry(lease)), name, holder, lease_time(Utc::now())],
                )?;
                Ok(changed == 1)
            })
            .await?;
        Ok(renewed)
    }

    /// Drops the lease if `holder` still owns it; a lease taken over by
    /// someone else is left alone.
    pub async fn release_lease(&self, name: &str, holder: &str) -> Result<()> {
        let (name, holder) = (name.to_string(), holder.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM leases WHERE name = ?1 AND holder = ?2",
                    params![name, holder],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

pub(super) fn lease_is_held(tx: &Transaction, lease: &LeaseCheck) -> rusqlite::Result<bool> {
    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM leases WHERE name = ?1 AND holder = ?2 AND expires_at > ?3",
        params![lease.name, lease.holder, lease_time(Utc::now())],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::tests::temp_repository;

    #[tokio::test]
    async fn test_lease_is_exclusive_until_released() {
        let (_dir, repo) = temp_repository().await;
        let lease = Duration::from_secs(30);

        assert!(repo.try_acquire_lease("pair:1:2", "a", lease).await.unwrap());
        assert!(!repo.try_acquire_lease("pair:1:2", "b", lease).await.unwrap());
        assert!(repo.try_acquire_lease("pair:1:3", "b", lease).await.unwrap());

        // Only the holder can release.
        repo.release_lease("pair:1:2", "b").await.unwrap();
        assert!(!repo.try_acquire_lease("pair:1:2", "b", lease).await.unwrap());

        repo.release_lease("pair:1:2", "a").await.unwrap();
        assert!(repo.try_acquire_lease("pair:1:2", "b", lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let (_dir, repo) = temp_repository().await;

        assert!(repo
            .try_acquire_lease("pair:1:2", "crashed", Duration::from_millis(50))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(!repo
            .renew_lease("pair:1:2", "crashed", Duration::from_secs(30))
            .await
            .unwrap());
        assert!(repo
            .try_acquire_lease("pair:1:2", "next", Duration::from_secs(30))
            .await
            .unwrap());
        assert!(repo
            .renew_lease("pair:1:2", "next", Duration::from_secs(30))
            .await
            .unwrap());
    }
}
