//! Unit of work over one store connection.
//!
//! A [`DbSession`] keeps an identity map of everything it loaded or inserted,
//! queues inserts and deletes, and writes all pending changes on
//! [`DbSession::flush`]. The session is single-owner; share the
//! [`SessionFactory`](crate::SessionFactory), not the session.

use crate::core::{DbError, EntityKey, ListQuery, Result, Row};
use crate::entity::{EntityRef, PersistentObject};
use crate::idgen::IdGenerator;
use crate::statement::{StatementKind, StatementResolver};
use crate::store::StoreExecutor;
use std::sync::Arc;
use tracing::{debug, trace};

pub mod cache;
pub mod deferred;
pub mod flush;
pub mod operations;

pub use cache::{CacheEntry, SessionCache};
pub use deferred::{DeferredHook, SerializedField};
pub use flush::FlushSummary;
pub use operations::{DeleteOperation, OperationLog};

pub struct DbSession {
    executor: Box<dyn StoreExecutor>,
    resolver: Arc<dyn StatementResolver>,
    id_generator: Arc<dyn IdGenerator>,
    cache: SessionCache,
    operations: OperationLog,
    deferred: Vec<Box<dyn DeferredHook>>,
    closed: bool,
}

impl DbSession {
    pub fn new(
        executor: Box<dyn StoreExecutor>,
        resolver: Arc<dyn StatementResolver>,
        id_generator: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            executor,
            resolver,
            id_generator,
            cache: SessionCache::new(),
            operations: OperationLog::new(),
            deferred: Vec::new(),
            closed: false,
        }
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn operations(&self) -> &OperationLog {
        &self.operations
    }

    pub fn resolver(&self) -> &Arc<dyn StatementResolver> {
        &self.resolver
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Cache first, then the entity's registered select statement.
    pub async fn select_by_id<T: PersistentObject>(&mut self, id: &str) -> Result<Option<EntityRef<T>>> {
        self.ensure_open()?;
        if let Some(cached) = self.cache.get(T::entity_type(), id) {
            trace!(entity = T::ENTITY_TYPE, id, "select by id served from cache");
            return EntityRef::from_managed(cached).map(Some);
        }
        let statement = self.resolver.statement_for(T::entity_type(), StatementKind::Select)?;
        let params = crate::core::param(T::ID_COLUMN, id);
        self.select_one_remapped(&statement, &params).await
    }

    pub async fn select_one<T: PersistentObject>(
        &mut self,
        statement: &str,
        params: &Row,
    ) -> Result<Option<EntityRef<T>>> {
        self.ensure_open()?;
        let statement = self.resolver.remap(statement);
        self.select_one_remapped(&statement, params).await
    }

    // `statement` has already been through the dialect table.
    async fn select_one_remapped<T: PersistentObject>(
        &mut self,
        statement: &str,
        params: &Row,
    ) -> Result<Option<EntityRef<T>>> {
        match self.executor.select_one(statement, params).await? {
            Some(row) => self.adopt::<T>(&row).map(Some),
            None => Ok(None),
        }
    }

    /// Returns nothing without touching the store when either paging bound is
    /// [`ListQuery::NO_RESULTS`].
    pub async fn select_list<T: PersistentObject>(
        &mut self,
        statement: &str,
        query: &ListQuery,
    ) -> Result<Vec<EntityRef<T>>> {
        let rows = self.select_rows(statement, query).await?;
        rows.iter().map(|row| self.adopt::<T>(row)).collect()
    }

    /// Raw rows, bypassing the identity map.
    pub async fn select_rows(&mut self, statement: &str, query: &ListQuery) -> Result<Vec<Row>> {
        if query.wants_no_results() {
            trace!(statement, "paging sentinel, skipping select");
            return Ok(Vec::new());
        }
        self.ensure_open()?;
        let statement = self.resolver.remap(statement);
        self.executor
            .select_many(&statement, &query.parameter, query.first_result, query.max_results)
            .await
    }

    pub async fn select_row(&mut self, statement: &str, params: &Row) -> Result<Option<Row>> {
        self.ensure_open()?;
        let statement = self.resolver.remap(statement);
        self.executor.select_one(&statement, params).await
    }

    /// Everything of type `T` currently in the identity map.
    pub fn find_in_cache<T: PersistentObject>(&self) -> Result<Vec<EntityRef<T>>> {
        self.cache
            .all_of_type(T::entity_type())
            .into_iter()
            .map(EntityRef::from_managed)
            .collect()
    }

    /// Drops objects whose deletion is pending in this session.
    pub fn prune_deleted<T: PersistentObject>(&self, objects: Vec<EntityRef<T>>) -> Result<Vec<EntityRef<T>>> {
        self.operations.prune_deleted(objects)
    }

    fn adopt<T: PersistentObject>(&mut self, row: &Row) -> Result<EntityRef<T>> {
        let loaded = EntityRef::new(T::from_row(row)?);
        let managed = self.cache.filter(loaded.managed())?;
        EntityRef::from_managed(managed)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Queues `entity` for insertion and returns its managed handle.
    pub async fn insert<T: PersistentObject>(&mut self, entity: T) -> Result<EntityRef<T>> {
        let handle = EntityRef::new(entity);
        self.insert_ref(&handle).await?;
        Ok(handle)
    }

    pub async fn insert_ref<T: PersistentObject>(&mut self, entity: &EntityRef<T>) -> Result<()> {
        self.ensure_open()?;
        self.operations
            .record_insert(entity.managed(), self.id_generator.as_ref(), &mut self.cache)
            .await?;
        Ok(())
    }

    /// Queues a delete by id. Returns `false` if one was already queued.
    pub fn delete<T: PersistentObject>(&mut self, id: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self
            .operations
            .record_delete(EntityKey::new(T::entity_type(), id), T::ID_COLUMN))
    }

    pub fn delete_entity<T: PersistentObject>(&mut self, entity: &EntityRef<T>) -> Result<bool> {
        let id = entity.id()?.ok_or_else(|| {
            DbError::ExecutionError(format!("cannot delete a {} without an id", T::ENTITY_TYPE))
        })?;
        self.delete::<T>(&id)
    }

    /// Queues an arbitrary delete statement, remapped for the active dialect.
    pub fn delete_bulk(&mut self, statement: &str, parameter: Row) -> Result<()> {
        self.ensure_open()?;
        let statement = self.resolver.remap(statement);
        self.operations.record_bulk_delete(statement, parameter);
        Ok(())
    }

    pub fn add_deferred_hook(&mut self, hook: Box<dyn DeferredHook>) -> Result<()> {
        self.ensure_open()?;
        self.deferred.push(hook);
        Ok(())
    }

    /// Deserializes a column of `owner` and registers the write-back hook.
    pub fn materialize<V, E>(
        &mut self,
        owner: &EntityRef<E>,
        read: fn(&E) -> &[u8],
        write_back: fn(&mut E, Vec<u8>),
    ) -> Result<Arc<std::sync::RwLock<V>>>
    where
        V: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
        E: PersistentObject,
    {
        let field = SerializedField::<V, E>::new(owner.clone(), read, write_back)?;
        let value = field.value();
        self.add_deferred_hook(Box::new(field))?;
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Transaction control
    // ------------------------------------------------------------------

    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.executor.commit().await
    }

    /// Rolls back the store transaction and forgets everything this session
    /// queued or cached.
    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.operations.clear();
        self.deferred.clear();
        self.cache = SessionCache::new();
        self.executor.rollback().await
    }

    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.operations.is_empty() {
            debug!(
                inserts = self.operations.inserts().len(),
                deletes = self.operations.deletes().len(),
                "closing session with unflushed operations"
            );
        }
        self.executor.close().await
    }

    pub(crate) fn executor_mut(&mut self) -> &mut dyn StoreExecutor {
        self.executor.as_mut()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(DbError::ExecutionError("session is closed".to_string()));
        }
        Ok(())
    }
}
