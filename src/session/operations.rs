use super::cache::SessionCache;
use crate::core::{EntityKey, Result, Row};
use crate::entity::{EntityRef, ManagedObject, PersistentObject};
use crate::idgen::IdGenerator;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// A delete queued for the next flush.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOperation {
    /// Single entity; executed with `{id_column: id}` as the parameter row.
    ById {
        key: EntityKey,
        id_column: &'static str,
    },
    /// Arbitrary statement, executed as-is.
    Bulk { statement: String, parameter: Row },
}

impl DeleteOperation {
    pub fn key(&self) -> Option<&EntityKey> {
        match self {
            Self::ById { key, .. } => Some(key),
            Self::Bulk { .. } => None,
        }
    }
}

impl fmt::Display for DeleteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ById { key, .. } => write!(f, "delete {key}"),
            Self::Bulk { statement, .. } => write!(f, "bulk delete '{statement}'"),
        }
    }
}

/// Pending inserts and deletes, in the order they were recorded.
#[derive(Default)]
pub struct OperationLog {
    inserts: Vec<Arc<dyn ManagedObject>>,
    deletes: Vec<DeleteOperation>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an insert, drawing an id from `id_generator` when the object has
    /// none. The object joins the cache without a snapshot.
    pub async fn record_insert(
        &mut self,
        object: Arc<dyn ManagedObject>,
        id_generator: &dyn IdGenerator,
        cache: &mut SessionCache,
    ) -> Result<EntityKey> {
        if object.id()?.is_none() {
            let id = id_generator.next_id().await?;
            object.assign_id(id)?;
        }
        let key = object.key()?;
        trace!(entity = %key, "insert recorded");
        cache.put(object.clone(), false)?;
        self.inserts.push(object);
        Ok(key)
    }

    /// Queues a delete by id. Returns `false` when one is already pending for
    /// the same key.
    pub fn record_delete(&mut self, key: EntityKey, id_column: &'static str) -> bool {
        if self.is_delete_pending(&key) {
            return false;
        }
        trace!(entity = %key, "delete recorded");
        self.deletes.push(DeleteOperation::ById { key, id_column });
        true
    }

    pub fn record_bulk_delete(&mut self, statement: impl Into<String>, parameter: Row) {
        self.deletes.push(DeleteOperation::Bulk {
            statement: statement.into(),
            parameter,
        });
    }

    pub fn is_delete_pending(&self, key: &EntityKey) -> bool {
        self.deletes.iter().any(|op| op.key() == Some(key))
    }

    pub fn pending_delete_keys(&self) -> HashSet<EntityKey> {
        self.deletes
            .iter()
            .filter_map(DeleteOperation::key)
            .cloned()
            .collect()
    }

    /// Cancels inserts that were deleted again in the same session and evicts
    /// every deleted or inserted key from the cache.
    pub fn reconcile_before_flush(&mut self, cache: &mut SessionCache) -> Result<()> {
        let mut insert_keys = self
            .inserts
            .iter()
            .map(|object| object.key().map(Some))
            .collect::<Result<Vec<_>>>()?;

        let mut cancelled = 0usize;
        let mut kept = Vec::with_capacity(self.deletes.len());
        for op in self.deletes.drain(..) {
            let DeleteOperation::ById { key, .. } = &op else {
                kept.push(op);
                continue;
            };
            cache.remove(key.entity_type, &key.id);
            if let Some(slot) = insert_keys
                .iter_mut()
                .find(|slot| slot.as_ref() == Some(key))
            {
                *slot = None;
                cancelled += 1;
            } else {
                kept.push(op);
            }
        }
        self.deletes = kept;

        let inserts = std::mem::take(&mut self.inserts);
        for (object, key) in inserts.into_iter().zip(insert_keys) {
            if let Some(key) = key {
                cache.remove(key.entity_type, &key.id);
                self.inserts.push(object);
            }
        }

        if cancelled > 0 {
            debug!(cancelled, "insert/delete pairs cancelled before flush");
        }
        Ok(())
    }

    /// Drops entries whose key has a pending delete.
    pub fn prune_deleted<T: PersistentObject>(&self, objects: Vec<EntityRef<T>>) -> Result<Vec<EntityRef<T>>> {
        if self.deletes.is_empty() {
            return Ok(objects);
        }
        let deleted = self.pending_delete_keys();
        let mut kept = Vec::with_capacity(objects.len());
        for object in objects {
            let pending = match object.id()? {
                Some(id) => deleted.contains(&EntityKey::new(T::entity_type(), id)),
                None => false,
            };
            if !pending {
                kept.push(object);
            }
        }
        Ok(kept)
    }

    pub fn inserts(&self) -> &[Arc<dyn ManagedObject>] {
        &self.inserts
    }

    pub fn deletes(&self) -> &[DeleteOperation] {
        &self.deletes
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty()
    }

    pub fn clear(&mut self) {
        self.inserts.clear();
        self.deletes.clear();
    }
}
