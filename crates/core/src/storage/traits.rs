use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StoreResult;
use super::types::{
    BatchGetOutput, BatchWriteOutput, GetItemOutput, Item, Key, PageOutput, QueryRequest,
    ReadConsistency, ScanRequest, WriteItemOutput, WriteRequest,
};

/// Thin adapter over a partition/sort-key store.
///
/// Implementations hold no state beyond their client handle and surface store
/// failures as [`StoreError`](super::StoreError) without retrying. Batch calls
/// must not exceed the store maxima; callers partition beforehand.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a single item. Absence is `Ok` with `item: None`.
    async fn get_item(
        &self,
        table: &str,
        key: &Key,
        consistency: ReadConsistency,
    ) -> StoreResult<GetItemOutput>;

    /// Writes an item, replacing any item with the same primary key.
    async fn put_item(&self, table: &str, item: Item) -> StoreResult<WriteItemOutput>;

    /// Deletes an item. Deleting an absent key succeeds.
    async fn delete_item(&self, table: &str, key: &Key) -> StoreResult<WriteItemOutput>;

    /// Reads up to one batch of keys.
    async fn batch_get_items(
        &self,
        table: &str,
        keys: &[Key],
        consistency: ReadConsistency,
    ) -> StoreResult<BatchGetOutput>;

    /// Writes up to one batch of put/delete requests.
    async fn batch_write_items(
        &self,
        table: &str,
        requests: Vec<WriteRequest>,
    ) -> StoreResult<BatchWriteOutput>;

    /// Reads one page of a query, resuming after `start_key` when given.
    async fn query_page(
        &self,
        table: &str,
        request: &QueryRequest,
        start_key: Option<Key>,
    ) -> StoreResult<PageOutput>;

    /// Reads one page of a scan, resuming after `start_key` when given.
    async fn scan_page(
        &self,
        table: &str,
        request: &ScanRequest,
        start_key: Option<Key>,
    ) -> StoreResult<PageOutput>;
}

/// Entities carrying creation and modification timestamps.
pub trait Timestamped {
    fn created_at(&self) -> Option<DateTime<Utc>>;

    fn set_created_at(&mut self, at: DateTime<Utc>);

    fn set_updated_at(&mut self, at: DateTime<Utc>);

    /// Stamps `createdAt` if unset and always refreshes `updatedAt`.
    fn touch(&mut self, now: DateTime<Utc>) {
        if self.created_at().is_none() {
            self.set_created_at(now);
        }
        self.set_updated_at(now);
    }
}

/// A record type persisted by a repository.
pub trait Entity: Timestamped + Clone + Send + Sync + 'static {
    /// Human-readable type name used in errors and logs.
    const ENTITY_TYPE: &'static str;

    fn to_item(&self) -> Item;

    fn from_item(item: &Item) -> StoreResult<Self>;
}

/// Builds primary keys for an entity type from its logical identifier.
pub trait KeyBuilder<E>: Clone + Send + Sync + 'static {
    type Id: Debug + Clone + Send + Sync;

    fn build_key(&self, id: &Self::Id) -> Key;

    fn key_of(&self, entity: &E) -> Key;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Stamped {
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    }

    impl Timestamped for Stamped {
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

    #[test]
    fn test_touch_stamps_created_once() {
        let first = Utc::now();
        let later = first + chrono::Duration::seconds(5);

        let mut stamped = Stamped::default();
        stamped.touch(first);
        assert_eq!(stamped.created_at, Some(first));
        assert_eq!(stamped.updated_at, Some(first));

        stamped.touch(later);
        assert_eq!(stamped.created_at, Some(first));
        assert_eq!(stamped.updated_at, Some(later));
    }
}
