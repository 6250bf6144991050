//! In-memory store implementation.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use planvault_core::storage::{
    AttrValue, BatchGetOutput, BatchWriteOutput, GetItemOutput, Item, Key, KeyAttributes,
    KeyValueStore, PageOutput, QueryRequest, ReadConsistency, ScanRequest, Select, StoreError,
    StoreResult, TableSchema, WriteItemOutput, WriteRequest, MAX_BATCH_GET, MAX_BATCH_WRITE,
};

/// Default number of items evaluated per scan or query page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Store calls, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    GetItem,
    PutItem,
    DeleteItem,
    BatchGet,
    BatchWrite,
    Query,
    Scan,
}

#[derive(Debug)]
struct Table {
    schema: TableSchema,
    /// Items by canonical primary-key string, which also fixes scan order.
    items: BTreeMap<String, Item>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Table>,
    calls: HashMap<StoreOperation, usize>,
    batch_write_sizes: Vec<usize>,
    failures: HashMap<StoreOperation, VecDeque<StoreError>>,
    deferred_writes: usize,
}

impl State {
    /// Counts the call and pops an injected failure, if any.
    fn begin(&mut self, operation: StoreOperation) -> StoreResult<()> {
        *self.calls.entry(operation).or_default() += 1;
        match self
            .failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn table(&self, name: &str) -> StoreResult<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::ResourceNotFound(format!("Table not found: {}", name)))
    }

    fn table_mut(&mut self, name: &str) -> StoreResult<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::ResourceNotFound(format!("Table not found: {}", name)))
    }
}

/// In-memory key-value store for testing.
///
/// Honours table schemas and secondary indexes, evaluates key conditions and
/// filters, pages results with exclusive start keys and reports consumed
/// capacity (0.5 units per eventually consistent read, 1.0 per strong read
/// or write). Calls are counted per operation and failures can be injected.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    page_size: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Sets the maximum number of items evaluated per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Creates (or replaces) a table.
    pub async fn create_table(&self, schema: TableSchema) {
        let mut state = self.state.write().await;
        state.tables.insert(
            schema.table_name.clone(),
            Table {
                schema,
                items: BTreeMap::new(),
            },
        );
    }

    /// Number of calls made for an operation.
    pub async fn calls(&self, operation: StoreOperation) -> usize {
        let state = self.state.read().await;
        state.calls.get(&operation).copied().unwrap_or(0)
    }

    /// Sizes of the batch-write calls made so far, in order.
    pub async fn batch_write_sizes(&self) -> Vec<usize> {
        self.state.read().await.batch_write_sizes.clone()
    }

    /// Clears call counters and recorded batch sizes.
    pub async fn reset_calls(&self) {
        let mut state = self.state.write().await;
        state.calls.clear();
        state.batch_write_sizes.clear();
    }

    /// Makes the next call of `operation` fail with `error`. Queued failures
    /// are consumed in order.
    pub async fn fail_next(&self, operation: StoreOperation, error: StoreError) {
        let mut state = self.state.write().await;
        state
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Leaves the last `count` requests of upcoming batch writes unprocessed.
    pub async fn defer_writes(&self, count: usize) {
        self.state.write().await.deferred_writes = count;
    }

    /// Number of items stored in a table.
    pub async fn item_count(&self, table: &str) -> usize {
        let state = self.state.read().await;
        state.tables.get(table).map_or(0, |t| t.items.len())
    }

    fn page_limit(&self, limit: Option<u32>) -> usize {
        limit
            .map(|limit| limit as usize)
            .unwrap_or(self.page_size)
            .clamp(1, self.page_size)
    }
}

fn read_units(consistency: ReadConsistency) -> f64 {
    if consistency.is_strong() {
        1.0
    } else {
        0.5
    }
}

/// Canonical string of a primary key, ordered by attribute name.
fn storage_key(key: &Key) -> StoreResult<String> {
    key.attributes()
        .map(|(name, value)| {
            let encoded = match value {
                AttrValue::S(s) | AttrValue::N(s) => s.clone(),
                AttrValue::B(bytes) => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
                other => {
                    return Err(StoreError::Validation(format!(
                        "Key attribute {} has unsupported type {}",
                        name,
                        other.type_tag()
                    )))
                }
            };
            Ok(format!("{}\u{1f}{}\u{1f}{}", name, value.type_tag(), encoded))
        })
        .collect::<StoreResult<Vec<_>>>()
        .map(|parts| parts.join("\u{1e}"))
}

/// Checks that `key` has exactly the attributes of `schema`.
fn validate_key(key: &Key, schema: &KeyAttributes) -> StoreResult<()> {
    let expected = 1 + usize::from(schema.sort_key.is_some());
    let matches = key.get(&schema.partition_key).is_some()
        && schema
            .sort_key
            .as_ref()
            .map_or(true, |sort_key| key.get(sort_key).is_some())
        && key.attributes().count() == expected;
    if matches {
        Ok(())
    } else {
        Err(StoreError::Validation(format!(
            "The provided key element does not match the schema: {}",
            key
        )))
    }
}

fn primary_key(item: &Item, schema: &KeyAttributes) -> StoreResult<Key> {
    Key::from_item(item, schema).ok_or_else(|| {
        StoreError::Validation(format!(
            "Missing key attribute {} in item",
            schema.partition_key
        ))
    })
}

fn compare_attr(a: Option<&AttrValue>, b: Option<&AttrValue>) -> Ordering {
    match (a, b) {
        (Some(AttrValue::N(_)), Some(AttrValue::N(_))) => {
            let a = a.and_then(AttrValue::as_f64).unwrap_or(0.0);
            let b = b.and_then(AttrValue::as_f64).unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Some(AttrValue::S(a)), Some(AttrValue::S(b))) => a.cmp(b),
        (Some(AttrValue::B(a)), Some(AttrValue::B(b))) => a.cmp(b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Resume key of an item: the table key plus the queried index key.
fn resume_key(item: &Item, table_keys: &KeyAttributes, index_keys: &KeyAttributes) -> Option<Key> {
    let names = [
        Some(&table_keys.partition_key),
        table_keys.sort_key.as_ref(),
        Some(&index_keys.partition_key),
        index_keys.sort_key.as_ref(),
    ];
    Key::from_attributes(
        names
            .into_iter()
            .flatten()
            .filter_map(|name| item.get(name).map(|value| (name.clone(), value.clone()))),
    )
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get_item(
        &self,
        table: &str,
        key: &Key,
        consistency: ReadConsistency,
    ) -> StoreResult<GetItemOutput> {
        let mut state = self.state.write().await;
        state.begin(StoreOperation::GetItem)?;
        let table = state.table(table)?;
        validate_key(key, &table.schema.keys)?;

        Ok(GetItemOutput {
            item: table.items.get(&storage_key(key)?).cloned(),
            consumed_capacity: Some(read_units(consistency)),
        })
    }

    async fn put_item(&self, table: &str, item: Item) -> StoreResult<WriteItemOutput> {
        let mut state = self.state.write().await;
        state.begin(StoreOperation::PutItem)?;
        let table = state.table_mut(table)?;
        let key = primary_key(&item, &table.schema.keys)?;
        table.items.insert(storage_key(&key)?, item);

        Ok(WriteItemOutput {
            consumed_capacity: Some(1.0),
        })
    }

    async fn delete_item(&self, table: &str, key: &Key) -> StoreResult<WriteItemOutput> {
        let mut state = self.state.write().await;
        state.begin(StoreOperation::DeleteItem)?;
        let table = state.table_mut(table)?;
        validate_key(key, &table.schema.keys)?;
        table.items.remove(&storage_key(key)?);

        Ok(WriteItemOutput {
            consumed_capacity: Some(1.0),
        })
    }

    async fn batch_get_items(
        &self,
        table: &str,
        keys: &[Key],
        consistency: ReadConsistency,
    ) -> StoreResult<BatchGetOutput> {
        let mut state = self.state.write().await;
        let mut output = BatchGetOutput::default();

        for chunk in keys.chunks(MAX_BATCH_GET) {
            state.begin(StoreOperation::BatchGet)?;
            let table = state.table(table)?;
            for key in chunk {
                validate_key(key, &table.schema.keys)?;
                if let Some(item) = table.items.get(&storage_key(key)?) {
                    output.items.push(item.clone());
                }
            }
            let units = chunk.len() as f64 * read_units(consistency);
            output.consumed_capacity = Some(output.consumed_capacity.unwrap_or(0.0) + units);
        }

        Ok(output)
    }

    async fn batch_write_items(
        &self,
        table: &str,
        requests: Vec<WriteRequest>,
    ) -> StoreResult<BatchWriteOutput> {
        let mut state = self.state.write().await;
        let mut output = BatchWriteOutput::default();

        let mut requests = requests.into_iter().peekable();
        while requests.peek().is_some() {
            let mut chunk: Vec<WriteRequest> = requests.by_ref().take(MAX_BATCH_WRITE).collect();
            state.begin(StoreOperation::BatchWrite)?;
            state.batch_write_sizes.push(chunk.len());

            let deferred = state.deferred_writes.min(chunk.len());
            state.deferred_writes -= deferred;
            let unprocessed = chunk.split_off(chunk.len() - deferred);

            let table = state.table_mut(table)?;
            for request in &chunk {
                match request {
                    WriteRequest::Put(item) => {
                        primary_key(item, &table.schema.keys)?;
                    }
                    WriteRequest::Delete(key) => validate_key(key, &table.schema.keys)?,
                }
            }
            let processed = chunk.len();
            for request in chunk {
                match request {
                    WriteRequest::Put(item) => {
                        let key = primary_key(&item, &table.schema.keys)?;
                        table.items.insert(storage_key(&key)?, item);
                    }
                    WriteRequest::Delete(key) => {
                        table.items.remove(&storage_key(&key)?);
                    }
                }
            }

            output.unprocessed.extend(unprocessed);
            output.consumed_capacity =
                Some(output.consumed_capacity.unwrap_or(0.0) + processed as f64);
        }

        Ok(output)
    }

    async fn query_page(
        &self,
        table: &str,
        request: &QueryRequest,
        start_key: Option<Key>,
    ) -> StoreResult<PageOutput> {
        let mut state = self.state.write().await;
        state.begin(StoreOperation::Query)?;
        let table = state.table(table)?;

        let table_keys = &table.schema.keys;
        let index_keys = match &request.index_name {
            Some(name) => &table
                .schema
                .index(name)
                .ok_or_else(|| {
                    StoreError::Validation(format!(
                        "The table does not have the specified index: {}",
                        name
                    ))
                })?
                .keys,
            None => table_keys,
        };

        let condition = &request.key_condition;
        if condition.partition_attribute() != Some(index_keys.partition_key.as_str()) {
            return Err(StoreError::Validation(
                "Query condition missed key schema element".to_string(),
            ));
        }
        if let Some(sort_attribute) = condition.sort_attribute() {
            if index_keys.sort_key.as_deref() != Some(sort_attribute) {
                return Err(StoreError::Validation(format!(
                    "Query key condition not supported on {}",
                    sort_attribute
                )));
            }
        }

        let sort_key = index_keys.sort_key.as_deref();
        let mut matching: Vec<(&String, &Item)> = table
            .items
            .iter()
            .filter(|(_, item)| {
                item.contains_key(&index_keys.partition_key)
                    && sort_key.map_or(true, |sort_key| item.contains_key(sort_key))
                    && condition.matches(item)
            })
            .collect();
        matching.sort_by(|(a_key, a), (b_key, b)| {
            let by_sort = sort_key
                .map(|sort_key| compare_attr(a.get(sort_key), b.get(sort_key)))
                .unwrap_or(Ordering::Equal);
            by_sort.then_with(|| a_key.cmp(b_key))
        });

        let start = match &start_key {
            Some(start_key) => {
                let start_primary = Key::from_attributes(
                    [Some(&table_keys.partition_key), table_keys.sort_key.as_ref()]
                        .into_iter()
                        .flatten()
                        .filter_map(|name| {
                            start_key.get(name).map(|value| (name.clone(), value.clone()))
                        }),
                )
                .ok_or_else(|| {
                    StoreError::Validation("Exclusive start key lacks table keys".to_string())
                })?;
                let start_storage = storage_key(&start_primary)?;
                let start_sort = sort_key.and_then(|sort_key| start_key.get(sort_key));
                matching
                    .iter()
                    .position(|(storage, item)| {
                        let by_sort = sort_key
                            .map(|sort_key| compare_attr(item.get(sort_key), start_sort))
                            .unwrap_or(Ordering::Equal);
                        by_sort.then_with(|| storage.as_str().cmp(start_storage.as_str()))
                            == Ordering::Greater
                    })
                    .unwrap_or(matching.len())
            }
            None => 0,
        };

        let limit = self.page_limit(request.limit);
        let evaluated: Vec<&Item> = matching[start..]
            .iter()
            .take(limit)
            .map(|(_, item)| *item)
            .collect();
        let more = matching.len() - start > evaluated.len();

        let last_evaluated_key = match evaluated.last() {
            Some(last) if more => resume_key(last, table_keys, index_keys),
            _ => None,
        };
        let consumed_capacity = Some(evaluated.len() as f64 * read_units(request.consistency));
        let matched: Vec<Item> = evaluated
            .into_iter()
            .filter(|item| request.filter.as_ref().map_or(true, |f| f.matches(item)))
            .cloned()
            .collect();

        Ok(page(matched, request.select, last_evaluated_key, consumed_capacity))
    }

    async fn scan_page(
        &self,
        table: &str,
        request: &ScanRequest,
        start_key: Option<Key>,
    ) -> StoreResult<PageOutput> {
        let mut state = self.state.write().await;
        state.begin(StoreOperation::Scan)?;
        let table = state.table(table)?;

        let lower = match &start_key {
            Some(key) => Bound::Excluded(storage_key(key)?),
            None => Bound::Unbounded,
        };
        let limit = self.page_limit(request.limit);

        let mut remaining = table.items.range((lower, Bound::Unbounded));
        let evaluated: Vec<&Item> = remaining.by_ref().take(limit).map(|(_, item)| item).collect();
        let more = remaining.next().is_some();

        let last_evaluated_key = match evaluated.last() {
            Some(last) if more => Key::from_item(last, &table.schema.keys),
            _ => None,
        };
        let consumed_capacity = Some(evaluated.len() as f64 * read_units(request.consistency));
        let matched: Vec<Item> = evaluated
            .into_iter()
            .filter(|item| request.filter.as_ref().map_or(true, |f| f.matches(item)))
            .cloned()
            .collect();

        Ok(page(matched, request.select, last_evaluated_key, consumed_capacity))
    }
}

fn page(
    matched: Vec<Item>,
    select: Select,
    last_evaluated_key: Option<Key>,
    consumed_capacity: Option<f64>,
) -> PageOutput {
    let count = matched.len() as u64;
    PageOutput {
        items: match select {
            Select::AllAttributes => matched,
            Select::Count => Vec::new(),
        },
        count,
        last_evaluated_key,
        consumed_capacity,
    }
}
