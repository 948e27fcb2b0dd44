use crate::PersistentObject;

/// Name/value pair stored in the property table.
///
/// Holds the schema version marker, the schema history and the shared id
/// counter (`next.dbid`).
#[derive(Debug, Clone, PartialEq, PersistentObject)]
#[persistent(entity = "Property")]
pub struct PropertyEntity {
    #[persistent(id, column = "name")]
    pub name: Option<String>,
    pub value: String,
    #[persistent(revision, column = "rev")]
    pub revision: i64,
}

impl PropertyEntity {
    pub const SCHEMA_VERSION: &'static str = "schema.version";
    pub const SCHEMA_HISTORY: &'static str = "schema.history";
    pub const NEXT_DBID: &'static str = "next.dbid";

    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            value: value.into(),
            revision: 1,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}
