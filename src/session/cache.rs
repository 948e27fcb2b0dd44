use crate::core::{EntityKey, EntityType, Result};
use crate::entity::{ManagedObject, PersistentState};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::trace;

/// A cached object plus the state it had when it was loaded.
///
/// Objects inserted in this session carry no snapshot: they are written by the
/// insert path, never by dirty checking.
pub struct CacheEntry {
    object: Arc<dyn ManagedObject>,
    snapshot: Option<PersistentState>,
}

impl CacheEntry {
    pub fn object(&self) -> &Arc<dyn ManagedObject> {
        &self.object
    }

    pub fn snapshot(&self) -> Option<&PersistentState> {
        self.snapshot.as_ref()
    }
}

/// Identity map: at most one entry per `(entity type, id)`.
#[derive(Default)]
pub struct SessionCache {
    entries: BTreeMap<EntityType, BTreeMap<String, CacheEntry>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the entry for the object's key.
    pub fn put(&mut self, object: Arc<dyn ManagedObject>, capture_snapshot: bool) -> Result<&CacheEntry> {
        let key = object.key()?;
        let snapshot = if capture_snapshot {
            Some(object.persistent_state()?)
        } else {
            None
        };

        let type_cache = self.entries.entry(key.entity_type).or_default();
        type_cache.insert(key.id.clone(), CacheEntry { object, snapshot });
        type_cache
            .get(&key.id)
            .ok_or_else(|| crate::core::DbError::ExecutionError(format!("cache entry {key} vanished")))
    }

    pub fn get(&self, entity_type: EntityType, id: &str) -> Option<Arc<dyn ManagedObject>> {
        self.entry(entity_type, id).map(|entry| entry.object.clone())
    }

    pub fn entry(&self, entity_type: EntityType, id: &str) -> Option<&CacheEntry> {
        self.entries.get(&entity_type).and_then(|type_cache| type_cache.get(id))
    }

    pub fn contains(&self, entity_type: EntityType, id: &str) -> bool {
        self.entry(entity_type, id).is_some()
    }

    pub fn remove(&mut self, entity_type: EntityType, id: &str) -> Option<CacheEntry> {
        let type_cache = self.entries.get_mut(&entity_type)?;
        let removed = type_cache.remove(id);
        if type_cache.is_empty() {
            self.entries.remove(&entity_type);
        }
        removed
    }

    /// Returns the cached instance when one exists for the loaded object's key,
    /// discarding the fresh copy; otherwise registers the loaded object with a
    /// snapshot.
    pub fn filter(&mut self, loaded: Arc<dyn ManagedObject>) -> Result<Arc<dyn ManagedObject>> {
        let key = loaded.key()?;
        if let Some(cached) = self.get(key.entity_type, &key.id) {
            trace!(entity = %key, "loaded object replaced by cached instance");
            return Ok(cached);
        }
        self.put(loaded.clone(), true)?;
        Ok(loaded)
    }

    pub fn all_of_type(&self, entity_type: EntityType) -> Vec<Arc<dyn ManagedObject>> {
        self.entries
            .get(&entity_type)
            .map(|type_cache| {
                type_cache
                    .values()
                    .map(|entry| entry.object.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshotted objects whose current state differs from their snapshot,
    /// skipping keys with a pending delete. Ordered by type, then id.
    pub fn dirty_objects(&self, pending_deletes: &HashSet<EntityKey>) -> Result<Vec<Arc<dyn ManagedObject>>> {
        let mut dirty = Vec::new();
        for (entity_type, type_cache) in &self.entries {
            for (id, entry) in type_cache {
                let Some(snapshot) = &entry.snapshot else {
                    continue;
                };
                if pending_deletes.contains(&EntityKey::new(*entity_type, id.clone())) {
                    continue;
                }
                if entry.object.persistent_state()? != *snapshot {
                    dirty.push(entry.object.clone());
                } else {
                    trace!(entity = %entity_type, id = %id, "loaded object was not updated");
                }
            }
        }
        Ok(dirty)
    }

    /// Re-captures the snapshot after the object's state has been written.
    pub fn refresh_snapshot(&mut self, entity_type: EntityType, id: &str) -> Result<()> {
        if let Some(entry) = self
            .entries
            .get_mut(&entity_type)
            .and_then(|type_cache| type_cache.get_mut(id))
        {
            entry.snapshot = Some(entry.object.persistent_state()?);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
