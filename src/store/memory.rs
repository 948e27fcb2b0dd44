use super::{StoreConnector, StoreExecutor};
use crate::core::{DbError, Result, Row, Value};
use crate::entity::PersistentObject;
use crate::statement::{EntityStatements, StatementKind};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Filter used by query and bulk-delete statements: `(row, params) -> matches`.
pub type RowPredicate = Arc<dyn Fn(&Row, &Row) -> bool + Send + Sync>;

#[derive(Clone)]
enum MemoryStatement {
    Insert { table: String },
    UpdateById { table: String },
    DeleteById { table: String },
    SelectById { table: String },
    SelectWhere { table: String, predicate: RowPredicate },
    DeleteWhere { table: String, predicate: RowPredicate },
}

impl MemoryStatement {
    fn table(&self) -> &str {
        match self {
            Self::Insert { table }
            | Self::UpdateById { table }
            | Self::DeleteById { table }
            | Self::SelectById { table }
            | Self::SelectWhere { table, .. }
            | Self::DeleteWhere { table, .. } => table,
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryTable {
    id_column: String,
    revision_column: Option<String>,
    rows: BTreeMap<String, Row>,
}

#[derive(Default)]
struct StoreState {
    tables: BTreeMap<String, MemoryTable>,
}

/// Reference backend keeping tables in process memory.
///
/// Connections are read-committed: writes are staged per connection and
/// published on `commit`. Updates on tables with a revision column only
/// match when the incoming revision equals the stored one, and store the
/// incremented revision. A commit fails with an optimistic lock conflict
/// when another connection committed a newer revision of an updated row in
/// the meantime.
///
/// `execute_script` understands two statement forms:
/// `CREATE TABLE <name> KEY <id_column> [REVISION <revision_column>]` and
/// `DROP TABLE <name>`.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
    statements: Arc<RwLock<HashMap<String, MemoryStatement>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_table(
        &self,
        name: &str,
        id_column: &str,
        revision_column: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if state.tables.contains_key(name) {
            return Err(DbError::TableExists(name.to_string()));
        }
        state.tables.insert(
            name.to_string(),
            MemoryTable {
                id_column: id_column.to_string(),
                revision_column: revision_column.map(str::to_string),
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    pub async fn drop_table(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.tables.remove(name).is_none() {
            return Err(DbError::TableNotFound(name.to_string()));
        }
        Ok(())
    }

    /// Binds the entity's statements (as named in `statements`) to `table`.
    pub async fn register_statements(&self, table: &str, statements: &EntityStatements) {
        let mut catalog = self.statements.write().await;
        let table = table.to_string();
        for kind in [
            StatementKind::Insert,
            StatementKind::Update,
            StatementKind::Delete,
            StatementKind::Select,
        ] {
            let Some(name) = statements.get(kind) else {
                continue;
            };
            let statement = match kind {
                StatementKind::Insert => MemoryStatement::Insert {
                    table: table.clone(),
                },
                StatementKind::Update => MemoryStatement::UpdateById {
                    table: table.clone(),
                },
                StatementKind::Delete => MemoryStatement::DeleteById {
                    table: table.clone(),
                },
                StatementKind::Select => MemoryStatement::SelectById {
                    table: table.clone(),
                },
            };
            catalog.insert(name.to_string(), statement);
        }
    }

    /// Registers the conventional statements of `T` and creates its table.
    pub async fn define_entity<T: PersistentObject>(&self, table: &str) -> Result<()> {
        self.register_statements(table, &EntityStatements::conventional(T::ENTITY_TYPE))
            .await;
        self.create_table(table, T::ID_COLUMN, T::REVISION_COLUMN).await
    }

    pub async fn define_query<F>(&self, name: &str, table: &str, predicate: F)
    where
        F: Fn(&Row, &Row) -> bool + Send + Sync + 'static,
    {
        self.statements.write().await.insert(
            name.to_string(),
            MemoryStatement::SelectWhere {
                table: table.to_string(),
                predicate: Arc::new(predicate),
            },
        );
    }

    pub async fn define_bulk_delete<F>(&self, name: &str, table: &str, predicate: F)
    where
        F: Fn(&Row, &Row) -> bool + Send + Sync + 'static,
    {
        self.statements.write().await.insert(
            name.to_string(),
            MemoryStatement::DeleteWhere {
                table: table.to_string(),
                predicate: Arc::new(predicate),
            },
        );
    }

    /// Committed rows of a table, ordered by id.
    pub async fn committed_rows(&self, table: &str) -> Result<Vec<Row>> {
        let state = self.state.read().await;
        let table = state
            .tables
            .get(table)
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
        Ok(table.rows.values().cloned().collect())
    }

    pub async fn committed_row(&self, table: &str, id: &str) -> Result<Option<Row>> {
        let state = self.state.read().await;
        let table = state
            .tables
            .get(table)
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
        Ok(table.rows.get(id).cloned())
    }

    pub fn connection(&self) -> InMemoryConnection {
        InMemoryConnection {
            store: self.clone(),
            staged: BTreeMap::new(),
            read_revisions: BTreeMap::new(),
            closed: false,
        }
    }

    async fn statement(&self, name: &str) -> Result<MemoryStatement> {
        self.statements
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::UnknownStatement(name.to_string()))
    }
}

#[async_trait]
impl StoreConnector for InMemoryStore {
    async fn connect(&self) -> Result<Box<dyn StoreExecutor>> {
        Ok(Box::new(self.connection()))
    }
}

fn key_of(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::Text(s)) => Some(s.clone()),
        Some(Value::Integer(i)) => Some(i.to_string()),
        _ => None,
    }
}

type StagedKey = (String, String);

pub struct InMemoryConnection {
    store: InMemoryStore,
    // `None` stages a delete.
    staged: BTreeMap<StagedKey, Option<Row>>,
    // Committed revision each staged update was based on.
    read_revisions: BTreeMap<StagedKey, Option<i64>>,
    closed: bool,
}

impl InMemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(DbError::Store("connection is closed".to_string()));
        }
        Ok(())
    }

    fn table<'a>(state: &'a StoreState, name: &str) -> Result<&'a MemoryTable> {
        state
            .tables
            .get(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    fn row_id(table_name: &str, table: &MemoryTable, row: &Row) -> Result<String> {
        key_of(row.get(&table.id_column)).ok_or_else(|| {
            DbError::ExecutionError(format!(
                "row for table '{}' has no usable '{}' column",
                table_name, table.id_column
            ))
        })
    }

    fn current_row(&self, table_name: &str, table: &MemoryTable, id: &str) -> Option<Row> {
        match self.staged.get(&(table_name.to_string(), id.to_string())) {
            Some(staged) => staged.clone(),
            None => table.rows.get(id).cloned(),
        }
    }

    fn current_rows(&self, table_name: &str, table: &MemoryTable) -> Vec<Row> {
        let mut merged = table.rows.clone();
        for ((staged_table, id), staged) in &self.staged {
            if staged_table != table_name {
                continue;
            }
            match staged {
                Some(row) => {
                    merged.insert(id.clone(), row.clone());
                }
                None => {
                    merged.remove(id);
                }
            }
        }
        merged.into_values().collect()
    }

    fn expect_kind(statement: &str, found: &MemoryStatement, expected: &str) -> DbError {
        DbError::ExecutionError(format!(
            "statement '{}' on table '{}' cannot be used for {}",
            statement,
            found.table(),
            expected
        ))
    }
}

#[async_trait]
impl StoreExecutor for InMemoryConnection {
    async fn select_one(&mut self, statement: &str, params: &Row) -> Result<Option<Row>> {
        self.ensure_open()?;
        let rows = match self.store.statement(statement).await? {
            MemoryStatement::SelectById { table: table_name } => {
                let state = self.store.state.read().await;
                let table = Self::table(&state, &table_name)?;
                let Some(id) = key_of(params.get(&table.id_column)) else {
                    return Ok(None);
                };
                return Ok(self.current_row(&table_name, table, &id));
            }
            MemoryStatement::SelectWhere { .. } => {
                self.select_many(statement, params, 0, i64::MAX).await?
            }
            other => return Err(Self::expect_kind(statement, &other, "select")),
        };

        if rows.len() > 1 {
            return Err(DbError::ExecutionError(format!(
                "statement '{}' returned {} rows where at most one was expected",
                statement,
                rows.len()
            )));
        }
        Ok(rows.into_iter().next())
    }

    async fn select_many(
        &mut self,
        statement: &str,
        params: &Row,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);

        match self.store.statement(statement).await? {
            MemoryStatement::SelectWhere {
                table: table_name,
                predicate,
            } => {
                let state = self.store.state.read().await;
                let table = Self::table(&state, &table_name)?;
                Ok(self
                    .current_rows(&table_name, table)
                    .into_iter()
                    .filter(|row| predicate(row, params))
                    .skip(offset)
                    .take(limit)
                    .collect())
            }
            MemoryStatement::SelectById { table: table_name } => {
                let state = self.store.state.read().await;
                let table = Self::table(&state, &table_name)?;
                let row = key_of(params.get(&table.id_column))
                    .and_then(|id| self.current_row(&table_name, table, &id));
                Ok(row.into_iter().skip(offset).take(limit).collect())
            }
            other => Err(Self::expect_kind(statement, &other, "select")),
        }
    }

    async fn insert(&mut self, statement: &str, row: &Row) -> Result<()> {
        self.ensure_open()?;
        let table_name = match self.store.statement(statement).await? {
            MemoryStatement::Insert { table } => table,
            other => return Err(Self::expect_kind(statement, &other, "insert")),
        };

        let state = self.store.state.read().await;
        let table = Self::table(&state, &table_name)?;
        let id = Self::row_id(&table_name, table, row)?;
        if self.current_row(&table_name, table, &id).is_some() {
            return Err(DbError::Store(format!(
                "duplicate key '{}' in table '{}'",
                id, table_name
            )));
        }
        drop(state);

        self.staged.insert((table_name, id), Some(row.clone()));
        Ok(())
    }

    async fn update(&mut self, statement: &str, row: &Row) -> Result<u64> {
        self.ensure_open()?;
        let table_name = match self.store.statement(statement).await? {
            MemoryStatement::UpdateById { table } => table,
            other => return Err(Self::expect_kind(statement, &other, "update")),
        };

        let state = self.store.state.read().await;
        let table = Self::table(&state, &table_name)?;
        let id = Self::row_id(&table_name, table, row)?;
        let Some(existing) = self.current_row(&table_name, table, &id) else {
            return Ok(0);
        };

        let mut updated = row.clone();
        let staged_key = (table_name, id);
        if let Some(revision_column) = &table.revision_column {
            let stored = existing.get(revision_column).and_then(Value::as_i64);
            let incoming = row.get(revision_column).and_then(Value::as_i64);
            if stored != incoming {
                return Ok(0);
            }
            let next = incoming.unwrap_or_default() + 1;
            updated.insert(revision_column.clone(), Value::Integer(next));
            if !self.staged.contains_key(&staged_key) {
                self.read_revisions.insert(staged_key.clone(), stored);
            }
        }
        drop(state);

        self.staged.insert(staged_key, Some(updated));
        Ok(1)
    }

    async fn delete(&mut self, statement: &str, params: &Row) -> Result<()> {
        self.ensure_open()?;
        match self.store.statement(statement).await? {
            MemoryStatement::DeleteById { table: table_name } => {
                let state = self.store.state.read().await;
                let table = Self::table(&state, &table_name)?;
                let Some(id) = key_of(params.get(&table.id_column)) else {
                    return Err(DbError::ExecutionError(format!(
                        "delete '{}' requires parameter '{}'",
                        statement, table.id_column
                    )));
                };
                drop(state);
                self.staged.insert((table_name, id), None);
                Ok(())
            }
            MemoryStatement::DeleteWhere {
                table: table_name,
                predicate,
            } => {
                let state = self.store.state.read().await;
                let table = Self::table(&state, &table_name)?;
                let doomed = self
                    .current_rows(&table_name, table)
                    .into_iter()
                    .filter(|row| predicate(row, params))
                    .map(|row| Self::row_id(&table_name, table, &row))
                    .collect::<Result<Vec<_>>>()?;
                drop(state);
                for id in doomed {
                    self.staged.insert((table_name.clone(), id), None);
                }
                Ok(())
            }
            other => Err(Self::expect_kind(statement, &other, "delete")),
        }
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.store.state.write().await;
        for (table_name, _) in self.staged.keys() {
            if !state.tables.contains_key(table_name) {
                return Err(DbError::TableNotFound(table_name.clone()));
            }
        }

        // Another connection committed a newer revision after our update.
        for ((table_name, id), read_revision) in &self.read_revisions {
            let Some(table) = state.tables.get(table_name) else {
                continue;
            };
            let committed = match (&table.revision_column, table.rows.get(id)) {
                (Some(column), Some(row)) => row.get(column).and_then(Value::as_i64),
                _ => None,
            };
            if committed != *read_revision {
                return Err(DbError::OptimisticLockConflict {
                    entity_type: table_name.clone(),
                    id: id.clone(),
                    affected_rows: 0,
                });
            }
        }

        self.read_revisions.clear();
        for ((table_name, id), staged) in std::mem::take(&mut self.staged) {
            let Some(table) = state.tables.get_mut(&table_name) else {
                continue;
            };
            match staged {
                Some(row) => {
                    table.rows.insert(id, row);
                }
                None => {
                    table.rows.remove(&id);
                }
            }
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.staged.clear();
        self.read_revisions.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.staged.clear();
        self.read_revisions.clear();
        self.closed = true;
        Ok(())
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.store.state.read().await.tables.contains_key(table))
    }

    async fn execute_script(&mut self, statement: &str) -> Result<()> {
        self.ensure_open()?;
        let tokens = statement
            .trim()
            .trim_end_matches(';')
            .split_whitespace()
            .collect::<Vec<_>>();
        let upper = tokens
            .iter()
            .map(|token| token.to_ascii_uppercase())
            .collect::<Vec<_>>();

        match upper.as_slice() {
            [create, table, _name, key, _id] if create == "CREATE" && table == "TABLE" && key == "KEY" => {
                self.store.create_table(tokens[2], tokens[4], None).await
            }
            [create, table, _name, key, _id, revision, _rev]
                if create == "CREATE"
                    && table == "TABLE"
                    && key == "KEY"
                    && revision == "REVISION" =>
            {
                self.store
                    .create_table(tokens[2], tokens[4], Some(tokens[6]))
                    .await
            }
            [drop, table, _name] if drop == "DROP" && table == "TABLE" => {
                self.store.drop_table(tokens[2]).await
            }
            _ => Err(DbError::ExecutionError(format!(
                "unsupported script statement '{}'",
                statement.trim()
            ))),
        }
    }
}
