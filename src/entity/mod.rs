//! The capability set every cacheable entity exposes, and the shared handle
//! the session hands out for it.

use crate::core::{DbError, EntityKey, EntityType, Result, Row, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod property;

pub use property::PropertyEntity;

/// Ordered column snapshot compared by value during dirty checking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PersistentState(BTreeMap<String, Value>);

impl PersistentState {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.0.insert(column.into(), value);
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for PersistentState {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Core trait for entities managed by a [`DbSession`](crate::DbSession).
///
/// Usually derived with `#[derive(PersistentObject)]`.
pub trait PersistentObject: Send + Sync + Sized + 'static {
    /// Logical entity name used for statement resolution and cache keys.
    const ENTITY_TYPE: &'static str;
    /// Column holding the identity in rows and by-id parameters.
    const ID_COLUMN: &'static str = "id";
    /// Column holding the optimistic-lock revision, if the entity has one.
    const REVISION_COLUMN: Option<&'static str> = None;

    fn id(&self) -> Option<&str>;
    fn set_id(&mut self, id: String);

    fn revision(&self) -> Option<i64> {
        None
    }

    fn set_revision(&mut self, _revision: i64) {}

    /// Everything that participates in dirty checking.
    fn persistent_state(&self) -> PersistentState;

    /// Full row handed to insert and update statements.
    fn to_row(&self) -> Row;

    fn from_row(row: &Row) -> Result<Self>;

    fn entity_type() -> EntityType {
        EntityType(Self::ENTITY_TYPE)
    }
}

/// Shared handle to a session-managed entity.
///
/// Two handles obtained for the same `(type, id)` within one session point to
/// the same object; compare them with [`EntityRef::ptr_eq`].
pub struct EntityRef<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for EntityRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for EntityRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_read() {
            Ok(guard) => f.debug_tuple("EntityRef").field(&*guard).finish(),
            Err(_) => f.write_str("EntityRef(<locked>)"),
        }
    }
}

impl<T: PersistentObject> EntityRef<T> {
    pub fn new(entity: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(entity)),
        }
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, T>> {
        Ok(self.inner.read()?)
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, T>> {
        Ok(self.inner.write()?)
    }

    pub fn ptr_eq(left: &Self, right: &Self) -> bool {
        Arc::ptr_eq(&left.inner, &right.inner)
    }

    pub fn id(&self) -> Result<Option<String>> {
        Ok(self.read()?.id().map(str::to_string))
    }

    pub(crate) fn managed(&self) -> Arc<dyn ManagedObject> {
        self.inner.clone()
    }

    pub(crate) fn from_managed(object: Arc<dyn ManagedObject>) -> Result<Self> {
        let entity_type = object.entity_type();
        object
            .into_any()
            .downcast::<RwLock<T>>()
            .map(|inner| Self { inner })
            .map_err(|_| {
                DbError::TypeMismatch(format!(
                    "cached entity of type '{}' is not a '{}'",
                    entity_type,
                    T::ENTITY_TYPE
                ))
            })
    }
}

/// Type-erased view of a managed entity, so one cache can hold every type.
pub trait ManagedObject: Send + Sync {
    fn entity_type(&self) -> EntityType;
    fn id_column(&self) -> &'static str;
    fn id(&self) -> Result<Option<String>>;
    fn assign_id(&self, id: String) -> Result<()>;
    fn revision(&self) -> Result<Option<i64>>;
    fn set_revision(&self, revision: i64) -> Result<()>;
    fn persistent_state(&self) -> Result<PersistentState>;
    fn to_row(&self) -> Result<Row>;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Cache key; fails if no id has been assigned yet.
    fn key(&self) -> Result<EntityKey> {
        let id = self.id()?.ok_or_else(|| {
            DbError::ExecutionError(format!(
                "entity of type '{}' has no id",
                self.entity_type()
            ))
        })?;
        Ok(EntityKey::new(self.entity_type(), id))
    }
}

impl<T: PersistentObject> ManagedObject for RwLock<T> {
    fn entity_type(&self) -> EntityType {
        T::entity_type()
    }

    fn id_column(&self) -> &'static str {
        T::ID_COLUMN
    }

    fn id(&self) -> Result<Option<String>> {
        Ok(self.read()?.id().map(str::to_string))
    }

    fn assign_id(&self, id: String) -> Result<()> {
        self.write()?.set_id(id);
        Ok(())
    }

    fn revision(&self) -> Result<Option<i64>> {
        Ok(self.read()?.revision())
    }

    fn set_revision(&self, revision: i64) -> Result<()> {
        self.write()?.set_revision(revision);
        Ok(())
    }

    fn persistent_state(&self) -> Result<PersistentState> {
        Ok(self.read()?.persistent_state())
    }

    fn to_row(&self) -> Result<Row> {
        Ok(self.read()?.to_row())
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
