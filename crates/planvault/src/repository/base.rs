//! Entity-agnostic repository over a `KeyValueStore`.
//!
//! Every store call runs under the retry policy and is timed by the metrics
//! collector. Consumed capacity reported by the store is forwarded to the
//! collector under the same `(operation, table)` key.

use std::collections::HashSet;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use futures_util::{Stream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use planvault_core::metrics::OperationMetrics;
use planvault_core::retry::{RetryError, RetryPolicy};
use planvault_core::storage::{
    BatchGetOutput, BatchLimits, BatchWriteOutput, Entity, Expression, GetItemOutput, Item, Key,
    KeyBuilder, KeyCondition, KeyValueStore, Page, PageOutput, PageRequest, QueryRequest,
    ReadConsistency, RepositoryError, Result, ScanRequest, StoreError, StoreResult,
    WriteItemOutput, WriteRequest,
};

/// Lazy, forward-only sequence of entities, fetched page by page.
pub type EntityStream<'a, E> = Pin<Box<dyn Stream<Item = Result<E>> + Send + 'a>>;

/// Store outputs that report consumed capacity.
trait ConsumedCapacity {
    fn consumed_capacity(&self) -> Option<f64>;
}

macro_rules! impl_consumed_capacity {
    ($($output:ty),*) => {
        $(impl ConsumedCapacity for $output {
            fn consumed_capacity(&self) -> Option<f64> {
                self.consumed_capacity
            }
        })*
    };
}

impl_consumed_capacity!(
    GetItemOutput,
    WriteItemOutput,
    BatchGetOutput,
    BatchWriteOutput,
    PageOutput
);

enum PageSource {
    Scan(ScanRequest),
    Query(QueryRequest),
}

/// Generic repository for one entity type stored in one table.
///
/// `K` turns logical identifiers into primary keys. Cloning is cheap; clones
/// share the store, the metrics collector and the cancellation token.
pub struct BaseRepository<E, K> {
    store: Arc<dyn KeyValueStore>,
    table_name: String,
    keys: K,
    retry: RetryPolicy,
    metrics: Arc<OperationMetrics>,
    limits: BatchLimits,
    consistency: ReadConsistency,
    cancel: CancellationToken,
    _entity: PhantomData<fn() -> E>,
}

impl<E, K: Clone> Clone for BaseRepository<E, K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            table_name: self.table_name.clone(),
            keys: self.keys.clone(),
            retry: self.retry,
            metrics: self.metrics.clone(),
            limits: self.limits,
            consistency: self.consistency,
            cancel: self.cancel.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E, K> BaseRepository<E, K>
where
    E: Entity,
    K: KeyBuilder<E>,
{
    /// Creates a repository with the default retry policy, batch limits and
    /// eventually consistent reads.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        table_name: impl Into<String>,
        keys: K,
        metrics: Arc<OperationMetrics>,
    ) -> Self {
        Self {
            store,
            table_name: table_name.into(),
            keys,
            retry: RetryPolicy::default(),
            metrics,
            limits: BatchLimits::default(),
            consistency: ReadConsistency::default(),
            cancel: CancellationToken::new(),
            _entity: PhantomData,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_read_consistency(mut self, consistency: ReadConsistency) -> Self {
        self.consistency = consistency;
        self
    }

    /// Returns a copy whose store calls and backoffs abort when `cancel` fires.
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        let mut repository = self.clone();
        repository.cancel = cancel;
        repository
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn keys(&self) -> &K {
        &self.keys
    }

    pub fn metrics(&self) -> &Arc<OperationMetrics> {
        &self.metrics
    }

    /// Runs one store call under the retry policy, timing it and recording
    /// consumed capacity.
    async fn call<T, F, Fut>(&self, operation: &'static str, store_call: F) -> Result<T>
    where
        T: ConsumedCapacity,
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let timer = self.metrics.start_operation(operation, &self.table_name);

        match self.retry.execute(&self.cancel, store_call).await {
            Ok(output) => {
                timer.record_success();
                if let Some(units) = output.consumed_capacity() {
                    self.metrics
                        .record_capacity_consumption(operation, &self.table_name, units);
                }
                Ok(output)
            }
            Err(RetryError::Cancelled) => {
                timer.record_cancelled();
                Err(self.failure(operation, RetryError::Cancelled))
            }
            Err(err) => {
                timer.record_error(&err);
                Err(self.failure(operation, err))
            }
        }
    }

    fn failure(&self, operation: &'static str, err: RetryError<StoreError>) -> RepositoryError {
        match err {
            RetryError::Cancelled => {
                tracing::info!(table = %self.table_name, operation, "Operation cancelled");
                RepositoryError::Cancelled {
                    operation,
                    table: self.table_name.clone(),
                }
            }
            RetryError::Exhausted { attempts, source } | RetryError::Permanent { attempts, source } => {
                tracing::error!(
                    table = %self.table_name,
                    operation,
                    attempts,
                    error = %source,
                    "Store operation failed"
                );
                RepositoryError::OperationFailed {
                    operation,
                    table: self.table_name.clone(),
                    attempts,
                    source,
                }
            }
        }
    }

    fn decode(&self, operation: &'static str, item: &Item) -> Result<E> {
        E::from_item(item).map_err(|source| RepositoryError::OperationFailed {
            operation,
            table: self.table_name.clone(),
            attempts: 1,
            source,
        })
    }

    /// Stamps timestamps and writes the entity. Last write wins.
    pub async fn save(&self, entity: E) -> Result<E> {
        let mut entity = entity;
        entity.touch(Utc::now());

        let item = entity.to_item();
        let (store, table) = (&self.store, self.table_name.as_str());
        self.call("save", move || store.put_item(table, item.clone()))
            .await?;

        tracing::debug!(
            table,
            entity_type = E::ENTITY_TYPE,
            key = %self.keys.key_of(&entity),
            "Saved entity"
        );
        Ok(entity)
    }

    /// Stamps and writes entities in sequential batches.
    ///
    /// Each batch is retried as a whole, so a retried batch may rewrite items
    /// that were already stored. Writes are idempotent by key.
    pub async fn save_all(&self, entities: Vec<E>) -> Result<Vec<E>> {
        if entities.is_empty() {
            return Ok(entities);
        }

        let now = Utc::now();
        let entities: Vec<E> = entities
            .into_iter()
            .map(|mut entity| {
                entity.touch(now);
                entity
            })
            .collect();

        let mut batches = 0;
        for chunk in entities.chunks(self.limits.write()) {
            let requests = chunk
                .iter()
                .map(|entity| WriteRequest::Put(entity.to_item()))
                .collect();
            self.write_batch("save_all", requests).await?;
            batches += 1;
        }

        tracing::info!(
            table = %self.table_name,
            count = entities.len(),
            batches,
            "Saved entities"
        );
        Ok(entities)
    }

    async fn write_batch(&self, operation: &'static str, requests: Vec<WriteRequest>) -> Result<()> {
        let (store, table, requests) = (&self.store, self.table_name.as_str(), &requests);
        self.call(operation, move || async move {
            let output = store.batch_write_items(table, requests.clone()).await?;
            if output.unprocessed.is_empty() {
                Ok(output)
            } else {
                Err(StoreError::Unprocessed {
                    count: output.unprocessed.len(),
                })
            }
        })
        .await?;
        Ok(())
    }

    /// Reads one entity. Absence is `Ok(None)`.
    pub async fn find_by_id(&self, id: &K::Id) -> Result<Option<E>> {
        let key = self.keys.build_key(id);
        let (store, table, key, consistency) =
            (&self.store, self.table_name.as_str(), &key, self.consistency);

        let output = self
            .call("find_by_id", move || store.get_item(table, key, consistency))
            .await?;

        output
            .item
            .map(|item| self.decode("find_by_id", &item))
            .transpose()
    }

    /// Reads many entities in batches. Missing ids are omitted and repeated
    /// ids are read once, so the result may be shorter than `ids`.
    pub async fn find_all_by_id(&self, ids: &[K::Id]) -> Result<Vec<E>> {
        let keys = unique_keys(ids.iter().map(|id| self.keys.build_key(id)));
        let mut entities = Vec::with_capacity(keys.len());

        for chunk in keys.chunks(self.limits.read()) {
            let (store, table, consistency) =
                (&self.store, self.table_name.as_str(), self.consistency);
            let output = self
                .call("find_all_by_id", move || async move {
                    let output = store.batch_get_items(table, chunk, consistency).await?;
                    if output.unprocessed.is_empty() {
                        Ok(output)
                    } else {
                        Err(StoreError::Unprocessed {
                            count: output.unprocessed.len(),
                        })
                    }
                })
                .await?;

            for item in &output.items {
                entities.push(self.decode("find_all_by_id", item)?);
            }
        }

        Ok(entities)
    }

    /// Deletes one entity. Deleting an absent id succeeds.
    pub async fn delete_by_id(&self, id: &K::Id) -> Result<()> {
        let key = self.keys.build_key(id);
        let (store, table, key) = (&self.store, self.table_name.as_str(), &key);
        self.call("delete_by_id", move || store.delete_item(table, key))
            .await?;
        Ok(())
    }

    /// Deletes entities in sequential batches.
    pub async fn delete_all(&self, entities: &[E]) -> Result<()> {
        let keys = entities.iter().map(|entity| self.keys.key_of(entity)).collect();
        self.delete_keys("delete_all", keys).await
    }

    /// Deletes entities by id in sequential batches.
    pub async fn delete_all_by_id(&self, ids: &[K::Id]) -> Result<()> {
        let keys = ids.iter().map(|id| self.keys.build_key(id)).collect();
        self.delete_keys("delete_all_by_id", keys).await
    }

    async fn delete_keys(&self, operation: &'static str, keys: Vec<Key>) -> Result<()> {
        let keys = unique_keys(keys);
        if keys.is_empty() {
            return Ok(());
        }

        let mut batches = 0;
        for chunk in keys.chunks(self.limits.write()) {
            let requests = chunk.iter().cloned().map(WriteRequest::Delete).collect();
            self.write_batch(operation, requests).await?;
            batches += 1;
        }

        tracing::info!(
            table = %self.table_name,
            operation,
            count = keys.len(),
            batches,
            "Deleted entities"
        );
        Ok(())
    }

    /// Counts every item in the table.
    ///
    /// This is a full count-only scan: O(table size) in time and read
    /// capacity. Keep it off hot paths.
    pub async fn count(&self) -> Result<u64> {
        let request = ScanRequest {
            consistency: self.consistency,
            ..ScanRequest::default()
        }
        .count_only();
        self.count_pages("count", PageSource::Scan(request)).await
    }

    /// Counts the items matching a key condition on an index.
    pub async fn count_index(&self, index_name: &str, key_condition: KeyCondition) -> Result<u64> {
        let request = self.query_request(index_name, key_condition).count_only();
        self.count_pages("count_index", PageSource::Query(request))
            .await
    }

    /// Streams every entity of the table.
    pub fn scan_all(&self) -> EntityStream<'_, E> {
        self.entity_stream("scan_all", PageSource::Scan(self.scan_request()))
    }

    /// Streams the entities matching `filter` (full scan).
    pub fn scan_with_filter(&self, filter: Expression) -> EntityStream<'_, E> {
        self.entity_stream(
            "scan_with_filter",
            PageSource::Scan(self.scan_request().with_filter(filter)),
        )
    }

    /// Streams the entities of an index matching a key condition.
    pub fn query_index(&self, index_name: &str, key_condition: KeyCondition) -> EntityStream<'_, E> {
        self.entity_stream(
            "query_index",
            PageSource::Query(self.query_request(index_name, key_condition)),
        )
    }

    /// Like [`query_index`](Self::query_index), keeping only entities matching `filter`.
    pub fn query_index_with_filter(
        &self,
        index_name: &str,
        key_condition: KeyCondition,
        filter: Expression,
    ) -> EntityStream<'_, E> {
        self.entity_stream(
            "query_index_with_filter",
            PageSource::Query(
                self.query_request(index_name, key_condition)
                    .with_filter(filter),
            ),
        )
    }

    fn scan_request(&self) -> ScanRequest {
        ScanRequest {
            consistency: self.consistency,
            ..ScanRequest::default()
        }
    }

    fn query_request(&self, index_name: &str, key_condition: KeyCondition) -> QueryRequest {
        let mut request = QueryRequest::new(key_condition).on_index(index_name);
        request.consistency = self.consistency;
        request
    }

    async fn fetch_page(
        &self,
        operation: &'static str,
        source: &PageSource,
        start_key: Option<Key>,
    ) -> Result<PageOutput> {
        let (store, table, start_key) = (&self.store, self.table_name.as_str(), &start_key);
        match source {
            PageSource::Scan(request) => {
                self.call(operation, move || {
                    store.scan_page(table, request, start_key.clone())
                })
                .await
            }
            PageSource::Query(request) => {
                self.call(operation, move || {
                    store.query_page(table, request, start_key.clone())
                })
                .await
            }
        }
    }

    async fn count_pages(&self, operation: &'static str, source: PageSource) -> Result<u64> {
        let mut total = 0;
        let mut pages = 0;
        let mut start_key = None;
        loop {
            let page = self.fetch_page(operation, &source, start_key).await?;
            total += page.count;
            pages += 1;
            match page.last_evaluated_key {
                Some(key) => start_key = Some(key),
                None => break,
            }
        }

        tracing::debug!(table = %self.table_name, operation, total, pages, "Counted items");
        Ok(total)
    }

    fn entity_stream(&self, operation: &'static str, source: PageSource) -> EntityStream<'_, E> {
        Box::pin(async_stream::stream! {
            let mut start_key = None;
            loop {
                let page = match self.fetch_page(operation, &source, start_key.take()).await {
                    Ok(page) => page,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };

                tracing::debug!(
                    table = %self.table_name,
                    operation,
                    items = page.items.len(),
                    "Fetched page"
                );

                for item in &page.items {
                    match self.decode(operation, item) {
                        Ok(entity) => yield Ok(entity),
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }

                match page.last_evaluated_key {
                    Some(key) => start_key = Some(key),
                    None => break,
                }
            }
        })
    }
}

/// Drops repeated keys, keeping first-seen order. A batch call rejects
/// duplicate keys.
fn unique_keys(keys: impl IntoIterator<Item = Key>) -> Vec<Key> {
    let mut seen = HashSet::new();
    keys.into_iter()
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

/// Materialises a stream.
pub async fn collect_all<E>(stream: EntityStream<'_, E>) -> Result<Vec<E>> {
    stream.try_collect().await
}

/// Materialises a stream and slices the requested page.
///
/// The store has no offsets, so this reads every matching entity: O(n) per page.
pub async fn paginate<E>(stream: EntityStream<'_, E>, request: PageRequest) -> Result<Page<E>> {
    let all = collect_all(stream).await?;
    Ok(Page::from_all(all, request))
}

/// Takes at most `limit` entities, fetching no more pages than needed.
pub async fn first_n<E>(stream: EntityStream<'_, E>, limit: usize) -> Result<Vec<E>> {
    stream.take(limit).try_collect().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use planvault_core::storage::expression::{contains, equal};
    use planvault_core::storage::{
        get_optional_datetime, get_string, put_datetime, AttrValue, KeyAttributes, TableSchema,
        Timestamped,
    };

    use super::*;
    use crate::storage::inmemory::{InMemoryStore, StoreOperation};

    const TABLE: &str = "notes";
    const AUTHOR_INDEX: &str = "author-index";

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: String,
        author: String,
        body: String,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    }

    impl Note {
        fn new(id: impl Into<String>, author: &str, body: &str) -> Self {
            Self {
                id: id.into(),
                author: author.to_string(),
                body: body.to_string(),
                created_at: None,
                updated_at: None,
            }
        }
    }

    impl Timestamped for Note {
        fn created_at(&self) -> Option<DateTime<Utc>> {
            self.created_at
        }

        fn set_created_at(&mut self, at: DateTime<Utc>) {
            self.created_at = Some(at);
        }

        fn set_updated_at(&mut self, at: DateTime<Utc>) {
            self.updated_at = Some(at);
        }
    }

    impl Entity for Note {
        const ENTITY_TYPE: &'static str = "Note";

        fn to_item(&self) -> Item {
            let mut item = Item::new();
            item.insert("id".to_string(), AttrValue::from(&self.id));
            item.insert("author".to_string(), AttrValue::from(&self.author));
            item.insert("body".to_string(), AttrValue::from(&self.body));
            if let Some(at) = self.created_at {
                put_datetime(&mut item, "createdAt", at);
            }
            if let Some(at) = self.updated_at {
                put_datetime(&mut item, "updatedAt", at);
            }
            item
        }

        fn from_item(item: &Item) -> StoreResult<Self> {
            Ok(Self {
                id: get_string(item, "id")?,
                author: get_string(item, "author")?,
                body: get_string(item, "body")?,
                created_at: get_optional_datetime(item, "createdAt")?,
                updated_at: get_optional_datetime(item, "updatedAt")?,
            })
        }
    }

    #[derive(Debug, Clone)]
    struct NoteKeys;

    impl KeyBuilder<Note> for NoteKeys {
        type Id = String;

        fn build_key(&self, id: &String) -> Key {
            Key::partition("id", id.as_str())
        }

        fn key_of(&self, note: &Note) -> Key {
            self.build_key(&note.id)
        }
    }

    async fn setup(page_size: usize) -> (InMemoryStore, BaseRepository<Note, NoteKeys>) {
        let store = InMemoryStore::new().with_page_size(page_size);
        store
            .create_table(
                TableSchema::new(TABLE, KeyAttributes::new("id"))
                    .with_index(AUTHOR_INDEX, KeyAttributes::new("author").with_sort_key("id")),
            )
            .await;
        let repository = BaseRepository::new(
            Arc::new(store.clone()),
            TABLE,
            NoteKeys,
            Arc::new(OperationMetrics::new()),
        )
        .with_retry_policy(RetryPolicy::new(
            3,
            Duration::from_millis(1),
            Duration::from_millis(10),
        ));
        (store, repository)
    }

    fn notes(count: usize) -> Vec<Note> {
        (0..count)
            .map(|i| Note::new(format!("n-{:03}", i), if i % 2 == 0 { "ana" } else { "bo" }, "text"))
            .collect()
    }

    #[tokio::test]
    async fn test_save_then_find_round_trip() {
        let (_, repository) = setup(100).await;

        let saved = repository.save(Note::new("n1", "ana", "hello")).await.unwrap();
        assert!(saved.created_at.is_some());
        assert_eq!(saved.created_at, saved.updated_at);

        let found = repository.find_by_id(&"n1".to_string()).await.unwrap();
        assert_eq!(found, Some(saved));
    }

    #[tokio::test]
    async fn test_resave_keeps_created_at() {
        let (_, repository) = setup(100).await;

        let first = repository.save(Note::new("n1", "ana", "v1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let mut edited = first.clone();
        edited.body = "v2".to_string();
        let second = repository.save(edited).await.unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
    }

    #[tokio::test]
    async fn test_find_missing_is_none() {
        let (_, repository) = setup(100).await;
        assert_eq!(repository.find_by_id(&"nope".to_string()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_all_partitions_into_batches() {
        let (store, repository) = setup(100).await;

        let saved = repository.save_all(notes(57)).await.unwrap();

        assert_eq!(saved.len(), 57);
        assert!(saved.iter().all(|note| note.created_at.is_some()));
        assert_eq!(store.calls(StoreOperation::BatchWrite).await, 3);
        assert_eq!(store.batch_write_sizes().await, vec![25, 25, 7]);
        assert_eq!(store.item_count(TABLE).await, 57);
    }

    #[tokio::test]
    async fn test_save_all_retries_unprocessed_batch() {
        let (store, repository) = setup(100).await;
        store.defer_writes(3).await;

        repository.save_all(notes(10)).await.unwrap();

        assert_eq!(store.calls(StoreOperation::BatchWrite).await, 2);
        assert_eq!(store.item_count(TABLE).await, 10);
    }

    #[tokio::test]
    async fn test_find_all_by_id_omits_missing() {
        let (_, repository) = setup(100).await;
        repository.save_all(notes(5)).await.unwrap();

        let ids: Vec<String> = ["n-000", "n-002", "missing-1", "n-004", "missing-2"]
            .iter()
            .map(|id| id.to_string())
            .collect();
        let found = repository.find_all_by_id(&ids).await.unwrap();

        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|note| !note.id.starts_with("missing")));
    }

    #[tokio::test]
    async fn test_find_all_by_id_reads_repeated_ids_once() {
        let (store, repository) = setup(100).await;
        repository.save(Note::new("n1", "ana", "x")).await.unwrap();

        let ids: Vec<String> = ["n1", "n1", "missing", "n1"]
            .iter()
            .map(|id| id.to_string())
            .collect();
        let found = repository.find_all_by_id(&ids).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "n1");
        assert_eq!(store.calls(StoreOperation::BatchGet).await, 1);
    }

    #[tokio::test]
    async fn test_find_all_by_id_partitions_reads() {
        let (store, repository) = setup(100).await;
        let saved = repository.save_all(notes(150)).await.unwrap();
        let ids: Vec<String> = saved.iter().map(|note| note.id.clone()).collect();

        let found = repository.find_all_by_id(&ids).await.unwrap();

        assert_eq!(found.len(), 150);
        assert_eq!(store.calls(StoreOperation::BatchGet).await, 2);
    }

    #[tokio::test]
    async fn test_delete_by_id_is_idempotent() {
        let (_, repository) = setup(100).await;
        repository.save(Note::new("n1", "ana", "x")).await.unwrap();

        repository.delete_by_id(&"n1".to_string()).await.unwrap();
        repository.delete_by_id(&"n1".to_string()).await.unwrap();

        assert_eq!(repository.find_by_id(&"n1".to_string()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_all() {
        let (store, repository) = setup(100).await;
        let saved = repository.save_all(notes(30)).await.unwrap();

        repository.delete_all(&saved[..20]).await.unwrap();

        assert_eq!(store.item_count(TABLE).await, 10);
    }

    #[tokio::test]
    async fn test_delete_all_partitions_writes() {
        let (store, repository) = setup(100).await;
        let saved = repository.save_all(notes(57)).await.unwrap();
        store.reset_calls().await;

        repository.delete_all(&saved).await.unwrap();

        assert_eq!(store.batch_write_sizes().await, vec![25, 25, 7]);
        assert_eq!(store.item_count(TABLE).await, 0);
    }

    #[tokio::test]
    async fn test_delete_all_skips_repeated_entities() {
        let (store, repository) = setup(100).await;
        let saved = repository.save_all(notes(2)).await.unwrap();
        store.reset_calls().await;

        let repeated = vec![saved[0].clone(), saved[1].clone(), saved[0].clone()];
        repository.delete_all(&repeated).await.unwrap();

        assert_eq!(store.batch_write_sizes().await, vec![2]);
        assert_eq!(store.item_count(TABLE).await, 0);
    }

    #[tokio::test]
    async fn test_count_and_scan_span_pages() {
        let (store, repository) = setup(4).await;
        repository.save_all(notes(10)).await.unwrap();

        assert_eq!(repository.count().await.unwrap(), 10);
        assert_eq!(store.calls(StoreOperation::Scan).await, 3);

        let all = collect_all(repository.scan_all()).await.unwrap();
        assert_eq!(all.len(), 10);
    }

    #[tokio::test]
    async fn test_scan_with_filter() {
        let (_, repository) = setup(3).await;
        let mut batch = notes(6);
        batch[1].body = "pack sunscreen".to_string();
        repository.save_all(batch).await.unwrap();

        let found = collect_all(repository.scan_with_filter(contains("body", "sunscreen")))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "n-001");
    }

    #[tokio::test]
    async fn test_query_index_and_count_index() {
        let (_, repository) = setup(2).await;
        repository.save_all(notes(9)).await.unwrap();

        let by_ana = collect_all(
            repository.query_index(AUTHOR_INDEX, KeyCondition::partition_eq("author", "ana")),
        )
        .await
        .unwrap();
        assert_eq!(by_ana.len(), 5);
        assert!(by_ana.windows(2).all(|w| w[0].id < w[1].id));

        let count = repository
            .count_index(AUTHOR_INDEX, KeyCondition::partition_eq("author", "bo"))
            .await
            .unwrap();
        assert_eq!(count, 4);

        let filtered = collect_all(repository.query_index_with_filter(
            AUTHOR_INDEX,
            KeyCondition::partition_eq("author", "ana"),
            equal("id", "n-004"),
        ))
        .await
        .unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[tokio::test]
    async fn test_paginate_and_first_n() {
        let (store, repository) = setup(4).await;
        repository.save_all(notes(12)).await.unwrap();

        let page = paginate(repository.scan_all(), PageRequest::new(2, 5))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 12);

        store.reset_calls().await;
        let first = first_n(repository.scan_all(), 3).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(store.calls(StoreOperation::Scan).await, 1);
    }

    #[tokio::test]
    async fn test_throttled_call_is_retried() {
        let (store, repository) = setup(100).await;
        for _ in 0..2 {
            store
                .fail_next(
                    StoreOperation::PutItem,
                    StoreError::ProvisionedThroughputExceeded("hot".into()),
                )
                .await;
        }

        repository.save(Note::new("n1", "ana", "x")).await.unwrap();

        assert_eq!(store.calls(StoreOperation::PutItem).await, 3);
        let stats = repository.metrics().stats("save", TABLE);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.error_count, 0);
        assert_eq!(stats.total_capacity, 1.0);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let (store, repository) = setup(100).await;
        for _ in 0..3 {
            store
                .fail_next(StoreOperation::GetItem, StoreError::Throttled("slow".into()))
                .await;
        }

        let err = repository.find_by_id(&"n1".to_string()).await.unwrap_err();

        assert!(matches!(
            err,
            RepositoryError::OperationFailed {
                operation: "find_by_id",
                attempts: 3,
                source: StoreError::Throttled(_),
                ..
            }
        ));
        assert_eq!(err.table(), Some(TABLE));
        assert_eq!(repository.metrics().stats("find_by_id", TABLE).error_count, 1);
    }

    #[tokio::test]
    async fn test_validation_error_is_not_retried() {
        let (store, repository) = setup(100).await;
        store
            .fail_next(StoreOperation::DeleteItem, StoreError::Validation("bad key".into()))
            .await;

        let err = repository.delete_by_id(&"n1".to_string()).await.unwrap_err();

        assert!(matches!(
            err,
            RepositoryError::OperationFailed {
                attempts: 1,
                source: StoreError::Validation(_),
                ..
            }
        ));
        assert_eq!(store.calls(StoreOperation::DeleteItem).await, 1);
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff() {
        let (store, repository) = setup(100).await;
        store
            .fail_next(StoreOperation::PutItem, StoreError::Throttled("slow".into()))
            .await;

        let cancel = CancellationToken::new();
        let repository = repository
            .with_retry_policy(RetryPolicy::new(
                3,
                Duration::from_secs(30),
                Duration::from_secs(30),
            ))
            .with_cancellation(cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = repository
            .save(Note::new("n1", "ana", "x"))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(err.store_error().is_none());
        assert_eq!(store.calls(StoreOperation::PutItem).await, 1);

        let stats = repository.metrics().stats("save", TABLE);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.error_count, 0);
        assert!(!repository.metrics().has_high_error_rate(50.0));
    }

    #[tokio::test]
    async fn test_undecodable_item_fails_stream() {
        let (store, repository) = setup(100).await;
        let mut broken = Item::new();
        broken.insert("id".to_string(), AttrValue::from("bad"));
        store.put_item(TABLE, broken).await.unwrap();

        let result = collect_all(repository.scan_all()).await;

        assert!(matches!(
            result,
            Err(RepositoryError::OperationFailed {
                source: StoreError::InvalidData(_),
                ..
            })
        ));
    }
}
