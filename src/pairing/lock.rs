use std::time::Duration;

use async_trait::async_trait;
use rand::{rng, Rng};
use tokio::time::{sleep, Instant};

use crate::db::{LeaseCheck, Repository};
use crate::error::{AppError, Result};

/// A held lock. Holders are random tokens so a lease taken over after expiry
/// can't be released or renewed by its previous owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub name: String,
    pub holder: String,
}

impl Lease {
    /// What a write has to verify to be sure the lease is still held.
    pub fn check(&self) -> LeaseCheck {
        LeaseCheck {
            name: self.name.clone(),
            holder: self.holder.clone(),
        }
    }
}

/// Mutual exclusion by name, across every process sharing the database.
#[async_trait]
pub trait NamedLock: Send + Sync {
    /// Waits for the lock, failing with `LockTimeout` when it stays busy.
    async fn acquire(&self, name: &str) -> Result<Lease>;

    /// Extends the lease, failing with `LockLost` if it already expired.
    async fn renew(&self, lease: &Lease) -> Result<()>;

    async fn release(&self, lease: Lease) -> Result<()>;
}

/// Lease lock stored in the `leases` table.
pub struct SqliteLeaseLock {
    repository: Repository,
    lease: Duration,
    wait: Duration,
    retry: Duration,
}

impl SqliteLeaseLock {
    pub fn new(repository: Repository, lease: Duration, wait: Duration, retry: Duration) -> Self {
        Self {
            repository,
            lease,
            wait,
            retry,
        }
    }

    fn holder_token() -> String {
        format!("{}-{:016x}", std::process::id(), rng().random::<u64>())
    }
}

#[async_trait]
impl NamedLock for SqliteLeaseLock {
    async fn acquire(&self, name: &str) -> Result<Lease> {
        let holder = Self::holder_token();
        let deadline = Instant::now() + self.wait;
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            if self.repository.try_acquire_lease(name, &holder, self.lease).await? {
                tracing::debug!("Acquired lock {} after {} attempt(s)", name, attempt);
                return Ok(Lease {
                    name: name.to_string(),
                    holder,
                });
            }
            if Instant::now() >= deadline {
                tracing::warn!("Lock {} still busy after {} attempt(s)", name, attempt);
                return Err(AppError::LockTimeout(name.to_string()));
            }

            // Jitter keeps two waiting jobs from polling in lockstep.
            let jitter = rng().random_range(0..=self.retry.as_millis() as u64 / 4);
            sleep(self.retry + Duration::from_millis(jitter)).await;
        }
    }

    async fn renew(&self, lease: &Lease) -> Result<()> {
        if self
            .repository
            .renew_lease(&lease.name, &lease.holder, self.lease)
            .await?
        {
            Ok(())
        } else {
            Err(AppError::LockLost(lease.name.clone()))
        }
    }

    async fn release(&self, lease: Lease) -> Result<()> {
        self.repository.release_lease(&lease.name, &lease.holder).await?;
        tracing::debug!("Released lock {}", lease.name);
        Ok(())
    }
}
