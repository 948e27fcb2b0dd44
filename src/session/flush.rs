use super::DbSession;
use super::operations::DeleteOperation;
use crate::core::{DbError, Result, param};
use crate::entity::ManagedObject;
use crate::statement::StatementKind;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Statement counts of one successful flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl FlushSummary {
    pub fn is_empty(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

impl DbSession {
    /// Writes every pending change through the executor.
    ///
    /// Order: reconcile the operation log, run deferred hooks, collect dirty
    /// objects, then inserts, updates and deletes. The first failure aborts the
    /// flush and leaves the logs intact; the caller is expected to roll back.
    /// Nothing is committed here.
    pub async fn flush(&mut self) -> Result<FlushSummary> {
        self.ensure_open()?;
        let span = info_span!(
            "session.flush",
            inserts = self.operations.inserts().len(),
            deletes = self.operations.deletes().len()
        );
        self.flush_inner().instrument(span).await
    }

    async fn flush_inner(&mut self) -> Result<FlushSummary> {
        self.operations.reconcile_before_flush(&mut self.cache)?;

        for hook in self.deferred.iter_mut() {
            hook.apply()?;
        }

        let pending_deletes = self.operations.pending_delete_keys();
        let dirty = self.cache.dirty_objects(&pending_deletes)?;
        event!(
            Level::DEBUG,
            inserts = self.operations.inserts().len(),
            updates = dirty.len(),
            deletes = self.operations.deletes().len(),
            "flushing session"
        );

        let summary = FlushSummary {
            inserted: self.flush_inserts().await?,
            updated: self.flush_updates(&dirty).await?,
            deleted: self.flush_deletes().await?,
        };

        self.operations.clear();
        event!(Level::DEBUG, ?summary, "flush complete");
        Ok(summary)
    }

    async fn flush_inserts(&mut self) -> Result<usize> {
        let inserts = self.operations.inserts().to_vec();
        for object in &inserts {
            let statement = self
                .resolver
                .statement_for(object.entity_type(), StatementKind::Insert)?;
            let row = object.to_row()?;
            event!(Level::TRACE, entity = %object.key()?, statement = %statement, "insert");
            self.executor.insert(&statement, &row).await?;
        }
        Ok(inserts.len())
    }

    async fn flush_updates(&mut self, dirty: &[Arc<dyn ManagedObject>]) -> Result<usize> {
        for object in dirty {
            let key = object.key()?;
            let statement = self
                .resolver
                .statement_for(key.entity_type, StatementKind::Update)?;
            let row = object.to_row()?;
            event!(Level::TRACE, entity = %key, statement = %statement, "update");
            let affected = self.executor.update(&statement, &row).await?;
            if affected != 1 {
                event!(Level::WARN, entity = %key, affected, "optimistic lock conflict");
                return Err(DbError::OptimisticLockConflict {
                    entity_type: key.entity_type.to_string(),
                    id: key.id,
                    affected_rows: affected,
                });
            }
            if let Some(revision) = object.revision()? {
                object.set_revision(revision + 1)?;
            }
            self.cache.refresh_snapshot(key.entity_type, &key.id)?;
        }
        Ok(dirty.len())
    }

    async fn flush_deletes(&mut self) -> Result<usize> {
        let deletes = self.operations.deletes().to_vec();
        for op in &deletes {
            match op {
                DeleteOperation::ById { key, id_column } => {
                    let statement = self
                        .resolver
                        .statement_for(key.entity_type, StatementKind::Delete)?;
                    event!(Level::TRACE, entity = %key, statement = %statement, "delete");
                    self.executor
                        .delete(&statement, &param(*id_column, key.id.as_str()))
                        .await?;
                }
                DeleteOperation::Bulk {
                    statement,
                    parameter,
                } => {
                    event!(Level::TRACE, statement = %statement, "bulk delete");
                    self.executor.delete(statement, parameter).await?;
                }
            }
        }
        Ok(deletes.len())
    }
}
