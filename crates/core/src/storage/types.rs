use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};

use super::expression::{Expression, KeyCondition};

/// A single attribute value as stored in the key-value store.
///
/// Numbers are kept in their string form, the same way the store transmits
/// them, so no precision is lost between the store and the entity mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    S(String),
    N(String),
    B(Vec<u8>),
    Bool(bool),
    Null,
    L(Vec<AttrValue>),
    M(HashMap<String, AttrValue>),
    Ss(Vec<String>),
    Ns(Vec<String>),
}

impl AttrValue {
    /// Returns the string payload of an `S` value.
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttrValue::S(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric payload of an `N` value parsed as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::N(n) => n.parse().ok(),
            _ => None,
        }
    }

    /// Returns the payload of a `Bool` value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Short type tag, used in error messages and canonical key strings.
    pub fn type_tag(&self) -> &'static str {
        match self {
            AttrValue::S(_) => "S",
            AttrValue::N(_) => "N",
            AttrValue::B(_) => "B",
            AttrValue::Bool(_) => "BOOL",
            AttrValue::Null => "NULL",
            AttrValue::L(_) => "L",
            AttrValue::M(_) => "M",
            AttrValue::Ss(_) => "SS",
            AttrValue::Ns(_) => "NS",
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::S(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::S(value)
    }
}

impl From<&String> for AttrValue {
    fn from(value: &String) -> Self {
        AttrValue::S(value.clone())
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::N(value.to_string())
    }
}

impl From<u64> for AttrValue {
    fn from(value: u64) -> Self {
        AttrValue::N(value.to_string())
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::N(value.to_string())
    }
}

/// A stored record: attribute name to value.
pub type Item = HashMap<String, AttrValue>;

/// Primary key of a stored record (partition key plus optional sort key).
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    attributes: BTreeMap<String, AttrValue>,
}

impl Key {
    /// Creates a key with only a partition attribute.
    pub fn partition(name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(name.into(), value.into());
        Self { attributes }
    }

    /// Adds the sort attribute.
    pub fn with_sort(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Extracts the key attributes of `schema` from a full item.
    ///
    /// Returns `None` when the item lacks one of the key attributes.
    pub fn from_item(item: &Item, schema: &KeyAttributes) -> Option<Self> {
        let mut key = Key::partition(
            schema.partition_key.clone(),
            item.get(&schema.partition_key)?.clone(),
        );
        if let Some(sort_key) = &schema.sort_key {
            key = key.with_sort(sort_key.clone(), item.get(sort_key)?.clone());
        }
        Some(key)
    }

    /// Builds a key from raw attributes, `None` when there are none.
    pub fn from_attributes(attributes: impl IntoIterator<Item = (String, AttrValue)>) -> Option<Self> {
        let attributes: BTreeMap<String, AttrValue> = attributes.into_iter().collect();
        if attributes.is_empty() {
            None
        } else {
            Some(Self { attributes })
        }
    }

    /// Looks up a single key attribute.
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// Iterates over the key attributes in name order.
    pub fn attributes(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.attributes.iter()
    }

    /// Converts the key into a store item containing only key attributes.
    pub fn into_item(self) -> Item {
        self.attributes.into_iter().collect()
    }
}

// Key attributes are scalars, so every attribute is compared reflexively.
impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (name, value) in &self.attributes {
            name.hash(state);
            value.type_tag().hash(state);
            match value {
                AttrValue::S(s) | AttrValue::N(s) => s.hash(state),
                AttrValue::B(bytes) => bytes.hash(state),
                _ => {}
            }
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .attributes
            .iter()
            .map(|(name, value)| match value {
                AttrValue::S(s) | AttrValue::N(s) => format!("{name}={s}"),
                other => format!("{name}=<{}>", other.type_tag()),
            })
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Partition and optional sort attribute names of a table or index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAttributes {
    pub partition_key: String,
    pub sort_key: Option<String>,
}

impl KeyAttributes {
    pub fn new(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: None,
        }
    }

    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }
}

/// A secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    pub keys: KeyAttributes,
}

/// Table definition: name, primary key and secondary indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table_name: String,
    pub keys: KeyAttributes,
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    pub fn new(table_name: impl Into<String>, keys: KeyAttributes) -> Self {
        Self {
            table_name: table_name.into(),
            keys,
            indexes: Vec::new(),
        }
    }

    /// Adds a secondary index.
    pub fn with_index(mut self, name: impl Into<String>, keys: KeyAttributes) -> Self {
        self.indexes.push(IndexSchema {
            name: name.into(),
            keys,
        });
        self
    }

    /// Sets the table name, keeping keys and indexes.
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Looks up a secondary index by name.
    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|index| index.name == name)
    }
}

/// Consistency mode of a read. Reads are eventually consistent unless asked otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadConsistency {
    #[default]
    Eventual,
    Strong,
}

impl ReadConsistency {
    pub fn is_strong(self) -> bool {
        matches!(self, ReadConsistency::Strong)
    }
}

/// Projection of a scan or query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Select {
    #[default]
    AllAttributes,
    /// Only the matching item count is returned, no items.
    Count,
}

/// One entry of a batch write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    Put(Item),
    Delete(Key),
}

/// Mode of a batch write issued by the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Put,
    Delete,
}

/// Parameters of a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub filter: Option<Expression>,
    pub select: Select,
    /// Maximum number of items evaluated per page.
    pub limit: Option<u32>,
    pub consistency: ReadConsistency,
}

impl ScanRequest {
    pub fn with_filter(mut self, filter: Expression) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn count_only(mut self) -> Self {
        self.select = Select::Count;
        self
    }
}

/// Parameters of a query against the table or one of its secondary indexes.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub index_name: Option<String>,
    pub key_condition: KeyCondition,
    pub filter: Option<Expression>,
    pub select: Select,
    pub limit: Option<u32>,
    pub consistency: ReadConsistency,
}

impl QueryRequest {
    pub fn new(key_condition: KeyCondition) -> Self {
        Self {
            index_name: None,
            key_condition,
            filter: None,
            select: Select::AllAttributes,
            limit: None,
            consistency: ReadConsistency::Eventual,
        }
    }

    pub fn on_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    pub fn with_filter(mut self, filter: Expression) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn count_only(mut self) -> Self {
        self.select = Select::Count;
        self
    }
}

/// Result of a single-item read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetItemOutput {
    pub item: Option<Item>,
    pub consumed_capacity: Option<f64>,
}

/// Result of a single-item write or delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteItemOutput {
    pub consumed_capacity: Option<f64>,
}

/// Result of a batch read. Missing keys are simply absent from `items`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetOutput {
    pub items: Vec<Item>,
    /// Keys the store did not process in this call.
    pub unprocessed: Vec<Key>,
    pub consumed_capacity: Option<f64>,
}

/// Result of a batch write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchWriteOutput {
    /// Requests the store did not process in this call.
    pub unprocessed: Vec<WriteRequest>,
    pub consumed_capacity: Option<f64>,
}

/// One page of a scan or query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageOutput {
    /// Matching items; empty for count-only projections.
    pub items: Vec<Item>,
    /// Number of matching items in this page.
    pub count: u64,
    /// Resume point for the next page, `None` on the last page.
    pub last_evaluated_key: Option<Key>,
    pub consumed_capacity: Option<f64>,
}

/// Store-imposed maximum items per batch call.
pub const MAX_BATCH_GET: usize = 100;
pub const MAX_BATCH_WRITE: usize = 25;

/// Client-side batch partition sizes, clamped to the store maxima.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    read: usize,
    write: usize,
}

impl BatchLimits {
    pub fn new(read: usize, write: usize) -> Self {
        Self {
            read: read.clamp(1, MAX_BATCH_GET),
            write: write.clamp(1, MAX_BATCH_WRITE),
        }
    }

    pub fn read(&self) -> usize {
        self.read
    }

    pub fn write(&self) -> usize {
        self.write
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self::new(MAX_BATCH_GET, MAX_BATCH_WRITE)
    }
}
