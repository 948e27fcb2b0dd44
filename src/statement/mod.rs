//! Entity type + operation kind to statement identifier resolution.

use crate::core::{DbError, EntityType, Result};
use crate::entity::PersistentObject;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    Select,
}

impl StatementKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Select => "select",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Database flavour; selects the statement override table.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    H2,
    Postgres,
    MySql,
    Oracle,
    MsSql,
    Db2,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Self::H2 => "h2",
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Oracle => "oracle",
            Self::MsSql => "mssql",
            Self::Db2 => "db2",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = DbError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "h2" => Ok(Self::H2),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySql),
            "oracle" => Ok(Self::Oracle),
            "mssql" => Ok(Self::MsSql),
            "db2" => Ok(Self::Db2),
            other => Err(DbError::Configuration(format!(
                "unknown database dialect '{}'",
                other
            ))),
        }
    }
}

/// Maps an entity type and operation to a backend statement identifier.
pub trait StatementResolver: Send + Sync {
    fn resolve(&self, entity_type: EntityType, kind: StatementKind) -> Option<String>;

    /// Redirects a generic statement id to its dialect-specific variant.
    fn remap(&self, statement: &str) -> String;

    /// Resolved and remapped, or a configuration error when nothing is registered.
    fn statement_for(&self, entity_type: EntityType, kind: StatementKind) -> Result<String> {
        self.resolve(entity_type, kind)
            .map(|statement| self.remap(&statement))
            .ok_or_else(|| {
                DbError::Configuration(format!(
                    "no {} statement registered for entity '{}'",
                    kind, entity_type
                ))
            })
    }
}

/// Statement ids for one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityStatements {
    pub insert: Option<String>,
    pub update: Option<String>,
    pub delete: Option<String>,
    pub select: Option<String>,
}

impl EntityStatements {
    /// `insert<Entity>`, `update<Entity>`, `delete<Entity>`, `select<Entity>`.
    pub fn conventional(entity: &str) -> Self {
        Self {
            insert: Some(format!("insert{entity}")),
            update: Some(format!("update{entity}")),
            delete: Some(format!("delete{entity}")),
            select: Some(format!("select{entity}")),
        }
    }

    pub fn with(mut self, kind: StatementKind, statement: impl Into<String>) -> Self {
        *self.slot_mut(kind) = Some(statement.into());
        self
    }

    pub fn without(mut self, kind: StatementKind) -> Self {
        *self.slot_mut(kind) = None;
        self
    }

    pub fn get(&self, kind: StatementKind) -> Option<&str> {
        match kind {
            StatementKind::Insert => self.insert.as_deref(),
            StatementKind::Update => self.update.as_deref(),
            StatementKind::Delete => self.delete.as_deref(),
            StatementKind::Select => self.select.as_deref(),
        }
    }

    fn slot_mut(&mut self, kind: StatementKind) -> &mut Option<String> {
        match kind {
            StatementKind::Insert => &mut self.insert,
            StatementKind::Update => &mut self.update,
            StatementKind::Delete => &mut self.delete,
            StatementKind::Select => &mut self.select,
        }
    }
}

/// Explicit registration table, resolved at configuration time.
#[derive(Debug, Clone, Default)]
pub struct StatementRegistry {
    dialect: Dialect,
    entities: HashMap<EntityType, EntityStatements>,
    overrides: HashMap<Dialect, HashMap<String, String>>,
}

impl StatementRegistry {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            entities: HashMap::new(),
            overrides: HashMap::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn is_registered(&self, entity_type: EntityType) -> bool {
        self.entities.contains_key(&entity_type)
    }

    pub fn register(&mut self, entity_type: EntityType, statements: EntityStatements) {
        self.entities.insert(entity_type, statements);
    }

    pub fn register_entity<T: PersistentObject>(&mut self, statements: EntityStatements) {
        self.register(T::entity_type(), statements);
    }

    pub fn register_conventional<T: PersistentObject>(&mut self) {
        self.register(
            T::entity_type(),
            EntityStatements::conventional(T::ENTITY_TYPE),
        );
    }

    pub fn with_conventional<T: PersistentObject>(mut self) -> Self {
        self.register_conventional::<T>();
        self
    }

    pub fn add_override(
        &mut self,
        dialect: Dialect,
        generic: impl Into<String>,
        specific: impl Into<String>,
    ) {
        self.overrides
            .entry(dialect)
            .or_default()
            .insert(generic.into(), specific.into());
    }

    pub fn with_overrides(mut self, overrides: HashMap<Dialect, HashMap<String, String>>) -> Self {
        for (dialect, table) in overrides {
            self.overrides.entry(dialect).or_default().extend(table);
        }
        self
    }
}

impl StatementResolver for StatementRegistry {
    fn resolve(&self, entity_type: EntityType, kind: StatementKind) -> Option<String> {
        self.entities
            .get(&entity_type)
            .and_then(|statements| statements.get(kind))
            .map(str::to_string)
    }

    fn remap(&self, statement: &str) -> String {
        self.overrides
            .get(&self.dialect)
            .and_then(|table| table.get(statement))
            .cloned()
            .unwrap_or_else(|| statement.to_string())
    }
}
