use crate::core::Result;
use crate::entity::{EntityRef, PersistentObject};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::{Arc, RwLock};
use tracing::trace;

/// Work applied at the start of every flush, before dirty checking.
pub trait DeferredHook: Send {
    fn apply(&mut self) -> Result<()>;
}

/// A value materialized from a serialized column of its owning entity.
///
/// Business code mutates the value through [`SerializedField::value`]; the
/// hook re-serializes it on flush and writes the bytes back to the owner only
/// when they changed, so an untouched value never makes its owner dirty.
pub struct SerializedField<V, E> {
    owner: EntityRef<E>,
    value: Arc<RwLock<V>>,
    baseline: Vec<u8>,
    write_back: fn(&mut E, Vec<u8>),
}

impl<V, E> SerializedField<V, E>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    E: PersistentObject,
{
    pub fn new(owner: EntityRef<E>, read: fn(&E) -> &[u8], write_back: fn(&mut E, Vec<u8>)) -> Result<Self> {
        let baseline = read(&*owner.read()?).to_vec();
        let value = serde_json::from_slice(&baseline)?;
        Ok(Self {
            owner,
            value: Arc::new(RwLock::new(value)),
            baseline,
            write_back,
        })
    }

    pub fn value(&self) -> Arc<RwLock<V>> {
        self.value.clone()
    }
}

impl<V, E> DeferredHook for SerializedField<V, E>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    E: PersistentObject,
{
    fn apply(&mut self) -> Result<()> {
        let bytes = serde_json::to_vec(&*self.value.read()?)?;
        if bytes == self.baseline {
            return Ok(());
        }
        trace!(entity = E::ENTITY_TYPE, "serialized field changed, writing back");
        (self.write_back)(&mut *self.owner.write()?, bytes.clone());
        self.baseline = bytes;
        Ok(())
    }
}
