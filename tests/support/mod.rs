#![allow(dead_code)]

use async_trait::async_trait;
use dbsession::{
    DbSession, Dialect, IdGenerator, PersistentObject, Result, Row, StatementRegistry,
    StoreExecutor, Value,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, PersistentObject)]
#[persistent(entity = "Task")]
pub struct Task {
    #[persistent(id)]
    pub id: Option<String>,
    #[persistent(revision, column = "rev")]
    pub revision: i64,
    pub title: String,
    pub priority: i64,
}

impl Task {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            revision: 1,
            title: title.to_string(),
            priority: 0,
        }
    }

    pub fn unsaved(title: &str) -> Self {
        Self {
            id: None,
            revision: 1,
            title: title.to_string(),
            priority: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SelectOne { statement: String, params: Row },
    SelectMany { statement: String, params: Row, offset: i64, limit: i64 },
    Insert { statement: String, row: Row },
    Update { statement: String, row: Row },
    Delete { statement: String, params: Row },
    Commit,
    Rollback,
    Close,
}

impl Call {
    pub fn statement(&self) -> Option<&str> {
        match self {
            Self::SelectOne { statement, .. }
            | Self::SelectMany { statement, .. }
            | Self::Insert { statement, .. }
            | Self::Update { statement, .. }
            | Self::Delete { statement, .. } => Some(statement),
            _ => None,
        }
    }
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    rows: BTreeMap<String, Row>,
    list: Vec<Row>,
    update_results: VecDeque<u64>,
}

/// Executor double that records every call and serves canned rows.
///
/// `select_one` answers with the row registered under the first parameter
/// value; `update` reports one affected row unless told otherwise.
#[derive(Clone, Default)]
pub struct RecordingStore {
    state: Arc<Mutex<MockState>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity<T: PersistentObject>(self, entity: &T) -> Self {
        let id = entity.id().unwrap().to_string();
        self.state.lock().unwrap().rows.insert(id, entity.to_row());
        self
    }

    pub fn with_list(self, rows: Vec<Row>) -> Self {
        self.state.lock().unwrap().list = rows;
        self
    }

    pub fn next_update_affects(&self, rows: u64) {
        self.state.lock().unwrap().update_results.push_back(rows);
    }

    pub fn executor(&self) -> Box<dyn StoreExecutor> {
        Box::new(RecordingExecutor {
            state: self.state.clone(),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn inserts(&self) -> Vec<Row> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Insert { row, .. } => Some(row),
                _ => None,
            })
            .collect()
    }

    pub fn updates(&self) -> Vec<Row> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Update { row, .. } => Some(row),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> Vec<(String, Row)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Delete { statement, params } => Some((statement, params)),
                _ => None,
            })
            .collect()
    }

    pub fn selects(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::SelectOne { .. } | Call::SelectMany { .. }))
            .count()
    }
}

struct RecordingExecutor {
    state: Arc<Mutex<MockState>>,
}

fn key_of(params: &Row) -> Option<String> {
    match params.values().next() {
        Some(Value::Text(text)) => Some(text.clone()),
        Some(Value::Integer(i)) => Some(i.to_string()),
        _ => None,
    }
}

#[async_trait]
impl StoreExecutor for RecordingExecutor {
    async fn select_one(&mut self, statement: &str, params: &Row) -> Result<Option<Row>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::SelectOne {
            statement: statement.to_string(),
            params: params.clone(),
        });
        Ok(key_of(params).and_then(|id| state.rows.get(&id).cloned()))
    }

    async fn select_many(
        &mut self,
        statement: &str,
        params: &Row,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Row>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::SelectMany {
            statement: statement.to_string(),
            params: params.clone(),
            offset,
            limit,
        });
        Ok(state.list.clone())
    }

    async fn insert(&mut self, statement: &str, row: &Row) -> Result<()> {
        self.state.lock().unwrap().calls.push(Call::Insert {
            statement: statement.to_string(),
            row: row.clone(),
        });
        Ok(())
    }

    async fn update(&mut self, statement: &str, row: &Row) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Update {
            statement: statement.to_string(),
            row: row.clone(),
        });
        Ok(state.update_results.pop_front().unwrap_or(1))
    }

    async fn delete(&mut self, statement: &str, params: &Row) -> Result<()> {
        self.state.lock().unwrap().calls.push(Call::Delete {
            statement: statement.to_string(),
            params: params.clone(),
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.state.lock().unwrap().calls.push(Call::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.state.lock().unwrap().calls.push(Call::Rollback);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().calls.push(Call::Close);
        Ok(())
    }
}

/// Hands out "1", "2", ... without any store round trip.
#[derive(Default)]
pub struct SequenceIds {
    next: AtomicI64,
}

#[async_trait]
impl IdGenerator for SequenceIds {
    async fn next_id(&self) -> Result<String> {
        Ok((self.next.fetch_add(1, Ordering::SeqCst) + 1).to_string())
    }
}

pub fn task_registry(dialect: Dialect) -> StatementRegistry {
    StatementRegistry::new(dialect).with_conventional::<Task>()
}

pub fn session_with_registry(store: &RecordingStore, registry: StatementRegistry) -> DbSession {
    DbSession::new(
        store.executor(),
        Arc::new(registry),
        Arc::new(SequenceIds::default()),
    )
}

pub fn session(store: &RecordingStore) -> DbSession {
    session_with_registry(store, task_registry(Dialect::H2))
}
