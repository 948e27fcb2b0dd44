//! Globally unique id allocation.
//!
//! [`DbIdGenerator`] claims ids from a shared counter in blocks so that most
//! calls never leave the process. Ids discarded with an unfinished block
//! (process restart, dropped generator) are never reused; gaps are expected.

use crate::core::{DbError, Result};
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub mod authority;

pub use authority::{IdBlockRetryPolicy, StoreCounterAuthority};

/// Largest block a counter can hand out; ids are `i64` on the store side.
pub const MAX_ID_BLOCK_SIZE: u64 = i64::MAX as u64;

/// Inclusive range `[next_id, last_id]` claimed from the shared counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdBlock {
    pub next_id: i64,
    pub last_id: i64,
}

impl IdBlock {
    pub fn new(next_id: i64, last_id: i64) -> Self {
        Self { next_id, last_id }
    }

    /// A block with nothing left in it; forces a refill on first use.
    pub fn exhausted() -> Self {
        Self {
            next_id: 0,
            last_id: -1,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.last_id < self.next_id
    }

    pub fn remaining(&self) -> u64 {
        if self.is_exhausted() {
            0
        } else {
            (self.last_id - self.next_id + 1) as u64
        }
    }
}

#[async_trait]
pub trait IdGenerator: Send + Sync {
    async fn next_id(&self) -> Result<String>;
}

/// The shared counter that hands out id blocks.
#[async_trait]
pub trait CounterAuthority: Send + Sync {
    async fn allocate_block(&self, size: u64) -> Result<IdBlock>;
}

/// Block-based id allocator shared by all sessions of a process.
///
/// One critical section covers both the exhaustion check and the refill; a
/// failed refill leaves the local range untouched.
pub struct DbIdGenerator {
    block_size: u64,
    authority: Arc<dyn CounterAuthority>,
    current: Mutex<IdBlock>,
}

impl DbIdGenerator {
    pub fn new(authority: Arc<dyn CounterAuthority>, block_size: u64) -> Result<Self> {
        if block_size == 0 || block_size > MAX_ID_BLOCK_SIZE {
            return Err(DbError::Configuration(format!(
                "id block size must be between 1 and {}, got {}",
                MAX_ID_BLOCK_SIZE, block_size
            )));
        }
        Ok(Self {
            block_size,
            authority,
            current: Mutex::new(IdBlock::exhausted()),
        })
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub async fn remaining_in_block(&self) -> u64 {
        self.current.lock().await.remaining()
    }

    pub async fn next_numeric_id(&self) -> Result<i64> {
        let mut current = self.current.lock().await;
        if current.is_exhausted() {
            let block = self.authority.allocate_block(self.block_size).await?;
            if block.is_exhausted() {
                return Err(DbError::ExecutionError(format!(
                    "counter authority returned an empty id block [{}, {}]",
                    block.next_id, block.last_id
                )));
            }
            debug!(
                "claimed id block [{}, {}] (size {})",
                block.next_id, block.last_id, self.block_size
            );
            *current = block;
        }

        let id = current.next_id;
        current.next_id += 1;
        Ok(id)
    }
}

#[async_trait]
impl IdGenerator for DbIdGenerator {
    async fn next_id(&self) -> Result<String> {
        Ok(self.next_numeric_id().await?.to_string())
    }
}

/// Random v4 uuids; needs no shared counter.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdGenerator;

impl UuidIdGenerator {
    pub fn new() -> Self {
        info!("using uuid id generation");
        Self
    }
}

#[async_trait]
impl IdGenerator for UuidIdGenerator {
    async fn next_id(&self) -> Result<String> {
        Ok(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingAuthority {
        next: AtomicI64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CounterAuthority for CountingAuthority {
        async fn allocate_block(&self, size: u64) -> Result<IdBlock> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let start = self.next.fetch_add(size as i64, Ordering::SeqCst) + 1;
            Ok(IdBlock::new(start, start + size as i64 - 1))
        }
    }

    #[test]
    fn test_block_bounds() {
        assert!(IdBlock::exhausted().is_exhausted());
        assert_eq!(IdBlock::new(1, 10).remaining(), 10);
        assert_eq!(IdBlock::new(11, 10).remaining(), 0);
    }

    #[test]
    fn test_zero_block_size_is_rejected() {
        let authority = Arc::new(CountingAuthority::default());
        assert!(DbIdGenerator::new(authority, 0).is_err());
    }

    #[tokio::test]
    async fn test_concurrent_callers_get_distinct_ids() {
        let authority = Arc::new(CountingAuthority::default());
        let generator = Arc::new(DbIdGenerator::new(authority.clone(), 7).unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let generator = generator.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..25 {
                    ids.push(generator.next_id().await.unwrap());
                }
                ids
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "duplicate id handed out");
            }
        }
        assert_eq!(seen.len(), 200);
        // 200 ids in blocks of 7.
        assert_eq!(authority.calls.load(Ordering::SeqCst), 29);
    }

    #[tokio::test]
    async fn test_uuid_generator_produces_unique_ids() {
        let generator = UuidIdGenerator::new();
        let a = generator.next_id().await.unwrap();
        let b = generator.next_id().await.unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
