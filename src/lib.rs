// ============================================================================
// dbsession: unit-of-work persistence sessions
// ============================================================================

//! A session mediates all reads and writes of a business-logic layer against
//! a relational store.
//!
//! - Loaded entities are identity-mapped: loading the same `(type, id)` twice
//!   in one session yields the same [`EntityRef`].
//! - Changes are found by comparing each entity's [`PersistentState`] against
//!   the snapshot taken at load time.
//! - [`DbSession::flush`] writes inserts, then updates (each checked for
//!   exactly one affected row), then deletes.
//! - Ids come from a shared counter in blocks ([`DbIdGenerator`]).
//!
//! ```ignore
//! let factory = SessionFactory::new(config, Arc::new(store), registry)?;
//! factory
//!     .run_in_session(|session| {
//!         Box::pin(async move {
//!             let task = session.select_by_id::<Task>("42").await?;
//!             if let Some(task) = task {
//!                 task.write()?.title = "renamed".to_string();
//!             }
//!             Ok(())
//!         })
//!     })
//!     .await?;
//! ```

// The derive macro emits `::dbsession::...` paths, which must also resolve
// inside this crate.
extern crate self as dbsession;

pub mod config;
pub mod core;
pub mod entity;
pub mod factory;
pub mod idgen;
pub mod schema;
pub mod session;
pub mod statement;
pub mod store;

pub use crate::core::{
    ColumnValue, DbError, EntityKey, EntityType, ListQuery, Result, Row, Value, param,
};
pub use config::{SchemaStrategy, SessionFactoryConfig};
pub use dbsession_derive::PersistentObject;
pub use entity::{EntityRef, ManagedObject, PersistentObject, PersistentState, PropertyEntity};
pub use factory::SessionFactory;
pub use idgen::{
    CounterAuthority, DbIdGenerator, IdBlock, IdBlockRetryPolicy, IdGenerator, MAX_ID_BLOCK_SIZE,
    StoreCounterAuthority, UuidIdGenerator,
};
pub use schema::{
    SchemaComponent, SchemaLifecycleManager, SchemaMigrationPlan, SchemaMigrationStep,
    SchemaScripts,
};
pub use session::{
    CacheEntry, DbSession, DeferredHook, DeleteOperation, FlushSummary, OperationLog,
    SerializedField, SessionCache,
};
pub use statement::{Dialect, EntityStatements, StatementKind, StatementRegistry, StatementResolver};
pub use store::{InMemoryConnection, InMemoryStore, StoreConnector, StoreExecutor};
