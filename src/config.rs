use crate::core::{DbError, Result};
use crate::idgen::MAX_ID_BLOCK_SIZE;
use crate::statement::Dialect;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// What the session factory does with the schema when it is built and closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaStrategy {
    /// Only verify the version; never touch DDL.
    #[default]
    #[serde(rename = "false")]
    False,
    #[serde(rename = "create")]
    Create,
    /// Create on build, drop on close.
    #[serde(rename = "create-drop")]
    CreateDrop,
    /// Drop whatever exists, then create.
    #[serde(rename = "drop-create")]
    DropCreate,
    /// Create or upgrade as needed.
    #[serde(rename = "true")]
    True,
}

/// Session factory configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionFactoryConfig {
    /// Database flavour; selects the statement override table
    pub dialect: Dialect,

    /// Ids claimed from the shared counter per round trip
    pub id_block_size: u64,

    /// Prepended to table names when probing for schema components
    pub table_prefix: String,

    pub schema_strategy: SchemaStrategy,

    /// Generic statement id to dialect-specific statement id, per dialect
    pub statement_overrides: HashMap<Dialect, HashMap<String, String>>,

    /// Attempts at claiming an id block before a conflict is surfaced
    pub max_id_block_attempts: usize,
}

impl Default for SessionFactoryConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::H2,
            id_block_size: 100,
            table_prefix: String::new(),
            schema_strategy: SchemaStrategy::False,
            statement_overrides: HashMap::new(),
            max_id_block_attempts: 5,
        }
    }
}

impl SessionFactoryConfig {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    /// Set the id block size
    pub fn id_block_size(mut self, size: u64) -> Self {
        self.id_block_size = size;
        self
    }

    /// Set the table prefix
    pub fn table_prefix(mut self, prefix: &str) -> Self {
        self.table_prefix = prefix.to_string();
        self
    }

    /// Set the schema strategy
    pub fn schema_strategy(mut self, strategy: SchemaStrategy) -> Self {
        self.schema_strategy = strategy;
        self
    }

    /// Add a statement override for one dialect
    pub fn statement_override(mut self, dialect: Dialect, generic: &str, specific: &str) -> Self {
        self.statement_overrides
            .entry(dialect)
            .or_default()
            .insert(generic.to_string(), specific.to_string());
        self
    }

    /// Set the number of id block claim attempts
    pub fn max_id_block_attempts(mut self, attempts: usize) -> Self {
        self.max_id_block_attempts = attempts;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| DbError::Configuration(format!("invalid session factory config: {}", err)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|err| {
            DbError::Configuration(format!("cannot read config file '{}': {}", path.display(), err))
        })?;
        Self::from_json_str(&json)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.id_block_size == 0 || self.id_block_size > MAX_ID_BLOCK_SIZE {
            return Err(DbError::Configuration(format!(
                "id_block_size must be between 1 and {}",
                MAX_ID_BLOCK_SIZE
            )));
        }

        if self.max_id_block_attempts == 0 {
            return Err(DbError::Configuration(
                "max_id_block_attempts must be > 0".to_string(),
            ));
        }

        for (dialect, table) in &self.statement_overrides {
            if let Some((generic, _)) = table.iter().find(|(_, specific)| specific.is_empty()) {
                return Err(DbError::Configuration(format!(
                    "empty {} override for statement '{}'",
                    dialect, generic
                )));
            }
        }

        Ok(())
    }
}
