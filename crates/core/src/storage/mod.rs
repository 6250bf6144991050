mod attributes;
mod error;
pub mod expression;
mod pagination;
mod traits;
mod types;

pub use attributes::{
    get_bool, get_datetime, get_optional_datetime, get_optional_string, get_string,
    put_datetime, put_optional_string,
};
pub use error::{RepositoryError, Result, StoreError, StoreResult};
pub use expression::{
    Comparator, Condition, Expression, KeyCondition, LogicalOperator, DELETED_ATTRIBUTE,
};
pub use pagination::{Page, PageRequest};
pub use traits::{Entity, KeyBuilder, KeyValueStore, Timestamped};
pub use types::{
    AttrValue, BatchGetOutput, BatchLimits, BatchWriteOutput, GetItemOutput, IndexSchema, Item,
    Key, KeyAttributes, PageOutput, QueryRequest, ReadConsistency, ScanRequest, Select,
    TableSchema, WriteItemOutput, WriteMode, WriteRequest, MAX_BATCH_GET, MAX_BATCH_WRITE,
};
