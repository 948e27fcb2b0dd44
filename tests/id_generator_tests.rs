use async_trait::async_trait;
use dbsession::{
    CounterAuthority, DbError, DbIdGenerator, Dialect, IdBlock, IdBlockRetryPolicy, IdGenerator,
    InMemoryStore, PropertyEntity, Result, StatementRegistry, StoreCounterAuthority,
    StoreExecutor,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

/// Authority double: hands out consecutive blocks, or fails on demand.
#[derive(Default)]
struct ScriptedAuthority {
    next: Mutex<i64>,
    calls: Mutex<Vec<u64>>,
    fail_next: Mutex<bool>,
}

impl ScriptedAuthority {
    fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

#[async_trait]
impl CounterAuthority for ScriptedAuthority {
    async fn allocate_block(&self, size: u64) -> Result<IdBlock> {
        self.calls.lock().unwrap().push(size);
        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            return Err(DbError::Store("counter unreachable".to_string()));
        }
        let mut next = self.next.lock().unwrap();
        let start = *next + 1;
        *next += size as i64;
        Ok(IdBlock::new(start, start + size as i64 - 1))
    }
}

#[tokio::test]
async fn one_block_serves_exactly_block_size_ids() {
    let authority = Arc::new(ScriptedAuthority::default());
    let generator = DbIdGenerator::new(authority.clone(), 5).unwrap();

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(generator.next_numeric_id().await.unwrap());
    }
    assert_eq!(authority.calls(), 1);
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(generator.remaining_in_block().await, 0);

    let sixth = generator.next_numeric_id().await.unwrap();
    assert_eq!(authority.calls(), 2);
    assert_eq!(sixth, 6);
    assert_eq!(generator.next_id().await.unwrap(), "7");
}

#[tokio::test]
async fn failed_refill_leaves_the_range_untouched() {
    let authority = Arc::new(ScriptedAuthority::default());
    let generator = DbIdGenerator::new(authority.clone(), 2).unwrap();
    assert_eq!(generator.next_numeric_id().await.unwrap(), 1);
    assert_eq!(generator.next_numeric_id().await.unwrap(), 2);

    authority.fail_next();
    let err = generator.next_numeric_id().await.unwrap_err();
    assert!(matches!(err, DbError::Store(_)));
    assert_eq!(generator.remaining_in_block().await, 0);

    // The next call refills cleanly and continues after the failed attempt.
    assert_eq!(generator.next_numeric_id().await.unwrap(), 3);
    assert_eq!(authority.calls(), 3);
}

async fn counter_store(start: &str) -> InMemoryStore {
    let store = InMemoryStore::new();
    store
        .define_entity::<PropertyEntity>("ACT_GE_PROPERTY")
        .await
        .unwrap();
    let mut conn = store.connection();
    conn.insert(
        "insertProperty",
        &dbsession::PersistentObject::to_row(&PropertyEntity::new(PropertyEntity::NEXT_DBID, start)),
    )
    .await
    .unwrap();
    conn.commit().await.unwrap();
    store
}

fn property_registry() -> Arc<StatementRegistry> {
    Arc::new(StatementRegistry::new(Dialect::H2).with_conventional::<PropertyEntity>())
}

#[tokio::test]
async fn store_authority_advances_the_counter_row() {
    let store = counter_store("1").await;
    let authority = StoreCounterAuthority::new(Arc::new(store.clone()), property_registry());

    assert_eq!(authority.allocate_block(10).await.unwrap(), IdBlock::new(1, 10));
    assert_eq!(authority.allocate_block(10).await.unwrap(), IdBlock::new(11, 20));

    let row = store
        .committed_row("ACT_GE_PROPERTY", PropertyEntity::NEXT_DBID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("value"), Some(&dbsession::Value::Text("21".to_string())));
    assert_eq!(row.get("rev"), Some(&dbsession::Value::Integer(3)));
}

#[tokio::test]
async fn store_authority_without_counter_row_is_a_configuration_error() {
    let store = InMemoryStore::new();
    store
        .define_entity::<PropertyEntity>("ACT_GE_PROPERTY")
        .await
        .unwrap();
    let authority = StoreCounterAuthority::new(Arc::new(store), property_registry());
    let err = authority.allocate_block(10).await.unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn oversized_block_leaves_the_counter_untouched() {
    let store = counter_store("100").await;
    let authority = StoreCounterAuthority::new(Arc::new(store.clone()), property_registry());

    let err = authority.allocate_block(u64::MAX).await.unwrap_err();
    assert!(err.is_configuration());

    let near_limit = counter_store(&(i64::MAX - 5).to_string()).await;
    let authority = StoreCounterAuthority::new(Arc::new(near_limit.clone()), property_registry());
    assert!(authority.allocate_block(10).await.unwrap_err().is_configuration());

    for (store, expected) in [(store, "100".to_string()), (near_limit, (i64::MAX - 5).to_string())] {
        let row = store
            .committed_row("ACT_GE_PROPERTY", PropertyEntity::NEXT_DBID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get("value"), Some(&dbsession::Value::Text(expected)));
        assert_eq!(row.get("rev"), Some(&dbsession::Value::Integer(1)));
    }
}

#[tokio::test]
async fn generator_rejects_blocks_larger_than_the_id_range() {
    let store = counter_store("100").await;
    let authority = Arc::new(StoreCounterAuthority::new(Arc::new(store), property_registry()));

    assert!(
        DbIdGenerator::new(authority.clone(), u64::MAX)
            .err()
            .unwrap()
            .is_configuration()
    );
    let generator = DbIdGenerator::new(authority, dbsession::MAX_ID_BLOCK_SIZE).unwrap();
    assert_eq!(generator.block_size(), i64::MAX as u64);
}

#[tokio::test]
async fn generators_sharing_a_store_never_collide() {
    let store = counter_store("1").await;
    let registry = property_registry();
    let retry = IdBlockRetryPolicy {
        max_attempts: 50,
        base_backoff_ms: 1,
        max_backoff_ms: 5,
    };

    let generators = (0..3)
        .map(|_| {
            let authority = StoreCounterAuthority::new(Arc::new(store.clone()), registry.clone())
                .with_retry_policy(retry);
            Arc::new(DbIdGenerator::new(Arc::new(authority), 4).unwrap())
        })
        .collect::<Vec<_>>();

    let tasks = generators
        .iter()
        .map(|generator| {
            let generator = generator.clone();
            tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..20 {
                    ids.push(generator.next_id().await.unwrap());
                }
                ids
            })
        })
        .collect::<Vec<_>>();

    let mut seen = HashSet::new();
    for ids in futures::future::join_all(tasks).await {
        for id in ids.unwrap() {
            assert!(seen.insert(id), "id handed out twice");
        }
    }
    assert_eq!(seen.len(), 60);
}
