pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, Result};
pub use types::{EntityKey, EntityType, ListQuery, Row, param};
pub use value::{ColumnValue, Value};
