use super::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Column name to value. Used both for rows and for statement parameters.
pub type Row = BTreeMap<String, Value>;

/// Builds a single-column parameter row.
pub fn param(column: impl Into<String>, value: impl Into<Value>) -> Row {
    let mut row = Row::new();
    row.insert(column.into(), value.into());
    row
}

/// Logical entity tag, the compile-time replacement for class-based lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityType(pub &'static str);

impl EntityType {
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// `(entity type, id)`: the identity-map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub id: String,
}

impl EntityKey {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.entity_type, self.id)
    }
}

/// Query parameter carrying paging bounds.
///
/// `-1` in either bound means "no results wanted" and short-circuits the
/// select without touching the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub parameter: Row,
    pub first_result: i64,
    pub max_results: i64,
}

impl ListQuery {
    pub const NO_RESULTS: i64 = -1;

    pub fn new(parameter: Row) -> Self {
        Self {
            parameter,
            first_result: 0,
            max_results: i64::MAX,
        }
    }

    pub fn page(mut self, first_result: i64, max_results: i64) -> Self {
        self.first_result = first_result;
        self.max_results = max_results;
        self
    }

    pub fn wants_no_results(&self) -> bool {
        self.first_result == Self::NO_RESULTS || self.max_results == Self::NO_RESULTS
    }
}

impl Default for ListQuery {
    fn default() -> Self {
        Self::new(Row::new())
    }
}
