use super::{CounterAuthority, IdBlock, UuidIdGenerator};
use crate::core::{DbError, Result};
use crate::entity::PropertyEntity;
use crate::session::DbSession;
use crate::statement::StatementResolver;
use crate::store::StoreConnector;
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// Retry behaviour for claiming an id block when another process bumped the
/// counter concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdBlockRetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for IdBlockRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 5,
            max_backoff_ms: 100,
        }
    }
}

impl IdBlockRetryPolicy {
    fn backoff_ms(&self, attempt: usize) -> u64 {
        let base = self.base_backoff_ms.max(1);
        let max = self.max_backoff_ms.max(base);
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1) as u32);
        base.saturating_mul(factor).min(max)
    }
}

/// Counter kept in the `next.dbid` property row, advanced in a dedicated
/// session and transaction of its own.
pub struct StoreCounterAuthority {
    connector: Arc<dyn StoreConnector>,
    resolver: Arc<dyn StatementResolver>,
    retry: IdBlockRetryPolicy,
}

impl StoreCounterAuthority {
    pub fn new(connector: Arc<dyn StoreConnector>, resolver: Arc<dyn StatementResolver>) -> Self {
        Self {
            connector,
            resolver,
            retry: IdBlockRetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: IdBlockRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn try_allocate(&self, size: u64) -> Result<IdBlock> {
        let executor = self.connector.connect().await?;
        let mut session = DbSession::new(executor, self.resolver.clone(), Arc::new(UuidIdGenerator));

        let result = Self::advance_counter(&mut session, size).await;
        if result.is_err() {
            if let Err(err) = session.rollback().await {
                warn!("rollback after failed id block claim failed: {}", err);
            }
        }
        if let Err(err) = session.close().await {
            warn!("closing id block session failed: {}", err);
        }
        result
    }

    async fn advance_counter(session: &mut DbSession, size: u64) -> Result<IdBlock> {
        let counter = session
            .select_by_id::<PropertyEntity>(PropertyEntity::NEXT_DBID)
            .await?
            .ok_or_else(|| {
                DbError::Configuration(format!(
                    "property '{}' is missing; the schema has not been initialized",
                    PropertyEntity::NEXT_DBID
                ))
            })?;

        let block = {
            let mut counter = counter.write()?;
            let next_id = counter.value.trim().parse::<i64>().map_err(|err| {
                DbError::Configuration(format!(
                    "property '{}' holds a non-numeric value '{}': {}",
                    PropertyEntity::NEXT_DBID,
                    counter.value,
                    err
                ))
            })?;
            let advanced = i64::try_from(size)
                .ok()
                .filter(|size| *size > 0)
                .and_then(|size| next_id.checked_add(size))
                .ok_or_else(|| {
                    DbError::Configuration(format!(
                        "cannot claim a block of {} ids after {} from '{}'",
                        size,
                        next_id,
                        PropertyEntity::NEXT_DBID
                    ))
                })?;
            counter.value = advanced.to_string();
            IdBlock::new(next_id, advanced - 1)
        };

        session.flush().await?;
        session.commit().await?;
        Ok(block)
    }
}

#[async_trait]
impl CounterAuthority for StoreCounterAuthority {
    async fn allocate_block(&self, size: u64) -> Result<IdBlock> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1usize;
        loop {
            match self.try_allocate(size).await {
                Ok(block) => {
                    debug!(
                        "advanced '{}' to {} (attempt {})",
                        PropertyEntity::NEXT_DBID,
                        block.last_id + 1,
                        attempt
                    );
                    return Ok(block);
                }
                Err(err) if err.is_optimistic_lock_conflict() && attempt < max_attempts => {
                    let backoff_ms = self.retry.backoff_ms(attempt);
                    warn!(
                        "id block claim retry on conflict (attempt {} of {}): {} (backoff={}ms)",
                        attempt, max_attempts, err, backoff_ms
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
