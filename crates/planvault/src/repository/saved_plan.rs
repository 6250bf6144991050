//! Repository for user ↔ travel plan associations.

use std::collections::HashSet;
use std::sync::Arc;

use planvault_core::metrics::OperationMetrics;
use planvault_core::saved_plan::{
    SavedPlan, ATTR_ID, ATTR_IS_FAVORITE, ATTR_NOTES, ATTR_TRAVEL_PLAN_ID, ATTR_USER_ID,
    OWNER_INDEX,
};
use planvault_core::storage::expression::{combine, contains, equal, not_deleted};
use planvault_core::storage::{
    Entity, Key, KeyBuilder, KeyCondition, KeyValueStore, LogicalOperator, Page, PageRequest,
    RepositoryError, Result,
};
use tokio_util::sync::CancellationToken;

use super::base::{collect_all, paginate, BaseRepository, EntityStream};

/// Primary keys for saved plans: the opaque association id.
#[derive(Debug, Clone, Copy, Default)]
pub struct SavedPlanKeys;

impl KeyBuilder<SavedPlan> for SavedPlanKeys {
    type Id = String;

    fn build_key(&self, id: &String) -> Key {
        Key::partition(ATTR_ID, id.as_str())
    }

    fn key_of(&self, plan: &SavedPlan) -> Key {
        self.build_key(&plan.id)
    }
}

/// Saved-plan repository.
///
/// Associations are keyed by an opaque id, so the `(owner, target)` pair is
/// not enforced unique by the store. Lookups by pair scan the table with a
/// filter; lookups by owner use the `userId-index` secondary index.
#[derive(Clone)]
pub struct SavedPlanRepository {
    base: BaseRepository<SavedPlan, SavedPlanKeys>,
}

impl SavedPlanRepository {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        table_name: impl Into<String>,
        metrics: Arc<OperationMetrics>,
    ) -> Self {
        Self::from_base(BaseRepository::new(store, table_name, SavedPlanKeys, metrics))
    }

    /// Wraps a preconfigured base repository (retry policy, limits, consistency).
    pub fn from_base(base: BaseRepository<SavedPlan, SavedPlanKeys>) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &BaseRepository<SavedPlan, SavedPlanKeys> {
        &self.base
    }

    /// Returns a copy whose operations abort when `cancel` fires.
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self::from_base(self.base.with_cancellation(cancel))
    }

    pub fn table_name(&self) -> &str {
        self.base.table_name()
    }

    pub async fn save(&self, plan: SavedPlan) -> Result<SavedPlan> {
        self.base.save(plan).await
    }

    pub async fn save_all(&self, plans: Vec<SavedPlan>) -> Result<Vec<SavedPlan>> {
        self.base.save_all(plans).await
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<SavedPlan>> {
        self.base.find_by_id(&id.to_string()).await
    }

    pub async fn find_all_by_id(&self, ids: &[String]) -> Result<Vec<SavedPlan>> {
        self.base.find_all_by_id(ids).await
    }

    pub async fn delete_by_id(&self, id: &str) -> Result<()> {
        self.base.delete_by_id(&id.to_string()).await
    }

    pub async fn delete_all(&self, plans: &[SavedPlan]) -> Result<()> {
        self.base.delete_all(plans).await
    }

    pub async fn delete_all_by_id(&self, ids: &[String]) -> Result<()> {
        self.base.delete_all_by_id(ids).await
    }

    /// Full count-only scan. Expensive on large tables.
    pub async fn count(&self) -> Result<u64> {
        self.base.count().await
    }

    /// Every association in the table (full scan).
    pub async fn find_all(&self) -> Result<Vec<SavedPlan>> {
        collect_all(self.base.scan_all()).await
    }

    /// Inserts a new association, failing if the pair is already linked.
    ///
    /// The check and the write are separate calls; concurrent creators can
    /// still both succeed.
    pub async fn create(&self, plan: SavedPlan) -> Result<SavedPlan> {
        if let Some(existing) = self
            .find_by_owner_and_target(&plan.user_id, &plan.travel_plan_id)
            .await?
        {
            return Err(RepositoryError::AlreadyExists {
                entity_type: SavedPlan::ENTITY_TYPE,
                id: existing.id,
            });
        }
        self.save(plan).await
    }

    pub async fn exists_by_owner_and_target(&self, owner_id: &str, target_id: &str) -> Result<bool> {
        Ok(self
            .find_by_owner_and_target(owner_id, target_id)
            .await?
            .is_some())
    }

    /// First association linking `owner_id` and `target_id`.
    ///
    /// Scans the whole table. More than one match means duplicate
    /// associations; they are logged, not repaired.
    pub async fn find_by_owner_and_target(
        &self,
        owner_id: &str,
        target_id: &str,
    ) -> Result<Option<SavedPlan>> {
        let mut matches = self
            .find_all_by_owner_and_target(owner_id, target_id)
            .await?;

        if matches.len() > 1 {
            tracing::warn!(
                table = %self.table_name(),
                owner_id,
                target_id,
                matches = matches.len(),
                "Duplicate saved plan associations"
            );
        }

        Ok(if matches.is_empty() {
            None
        } else {
            Some(matches.swap_remove(0))
        })
    }

    /// Every association linking `owner_id` and `target_id` (full scan).
    pub async fn find_all_by_owner_and_target(
        &self,
        owner_id: &str,
        target_id: &str,
    ) -> Result<Vec<SavedPlan>> {
        let filter = combine(
            equal(ATTR_USER_ID, owner_id),
            equal(ATTR_TRAVEL_PLAN_ID, target_id),
            LogicalOperator::And,
        );
        collect_all(self.base.scan_with_filter(filter)).await
    }

    fn by_owner(&self, owner_id: &str) -> EntityStream<'_, SavedPlan> {
        self.base
            .query_index(OWNER_INDEX, Self::owner_condition(owner_id))
    }

    fn owner_condition(owner_id: &str) -> KeyCondition {
        KeyCondition::partition_eq(ATTR_USER_ID, owner_id)
    }

    /// One page of an owner's associations, ordered by travel plan id.
    pub async fn find_by_owner(&self, owner_id: &str, page: PageRequest) -> Result<Page<SavedPlan>> {
        paginate(self.by_owner(owner_id), page).await
    }

    /// Every association of an owner.
    pub async fn find_all_by_owner(&self, owner_id: &str) -> Result<Vec<SavedPlan>> {
        collect_all(self.by_owner(owner_id)).await
    }

    /// Travel plan ids saved by an owner.
    pub async fn get_saved_plan_ids(&self, owner_id: &str) -> Result<Vec<String>> {
        Ok(self
            .find_all_by_owner(owner_id)
            .await?
            .into_iter()
            .map(|plan| plan.travel_plan_id)
            .collect())
    }

    pub async fn count_by_owner(&self, owner_id: &str) -> Result<u64> {
        self.base
            .count_index(OWNER_INDEX, Self::owner_condition(owner_id))
            .await
    }

    /// Favourite, non-deleted associations of an owner.
    pub async fn find_favorites_by_owner(&self, owner_id: &str) -> Result<Vec<SavedPlan>> {
        let filter = combine(
            equal(ATTR_IS_FAVORITE, true),
            not_deleted(),
            LogicalOperator::And,
        );
        collect_all(self.base.query_index_with_filter(
            OWNER_INDEX,
            Self::owner_condition(owner_id),
            filter,
        ))
        .await
    }

    /// Associations of an owner whose notes contain `text` (case-sensitive).
    pub async fn search_notes_by_owner(&self, owner_id: &str, text: &str) -> Result<Vec<SavedPlan>> {
        collect_all(self.base.query_index_with_filter(
            OWNER_INDEX,
            Self::owner_condition(owner_id),
            contains(ATTR_NOTES, text),
        ))
        .await
    }

    /// Deletes the association linking the pair. Returns `false` if there was none.
    pub async fn delete_by_owner_and_target(&self, owner_id: &str, target_id: &str) -> Result<bool> {
        match self.find_by_owner_and_target(owner_id, target_id).await? {
            Some(plan) => {
                self.base.delete_by_id(&plan.id).await?;
                tracing::info!(owner_id, target_id, "Deleted saved plan");
                Ok(true)
            }
            None => {
                tracing::warn!(owner_id, target_id, "No saved plan to delete");
                Ok(false)
            }
        }
    }

    /// Deletes every association of an owner. Returns how many were removed.
    pub async fn delete_all_by_owner(&self, owner_id: &str) -> Result<usize> {
        let plans = self.find_all_by_owner(owner_id).await?;
        if !plans.is_empty() {
            self.base.delete_all(&plans).await?;
            tracing::info!(owner_id, count = plans.len(), "Deleted all saved plans for owner");
        }
        Ok(plans.len())
    }

    /// Deletes every association referencing a travel plan, for cascade
    /// cleanup when the plan itself is removed.
    ///
    /// This scans the whole table. Do not call it on a hot path against a
    /// large table.
    pub async fn delete_all_by_target(&self, target_id: &str) -> Result<usize> {
        let plans =
            collect_all(self.base.scan_with_filter(equal(ATTR_TRAVEL_PLAN_ID, target_id))).await?;
        if !plans.is_empty() {
            self.base.delete_all(&plans).await?;
            tracing::info!(target_id, count = plans.len(), "Deleted saved plan references");
        }
        Ok(plans.len())
    }

    /// Saves `target_ids` for an owner, skipping targets already saved and
    /// repeated ids. Returns the newly created associations.
    pub async fn batch_save_for_owner(
        &self,
        owner_id: &str,
        target_ids: &[String],
    ) -> Result<Vec<SavedPlan>> {
        let mut seen: HashSet<String> = self
            .get_saved_plan_ids(owner_id)
            .await?
            .into_iter()
            .collect();

        let plans: Vec<SavedPlan> = target_ids
            .iter()
            .filter(|target_id| seen.insert(target_id.to_string()))
            .map(|target_id| SavedPlan::new(owner_id, target_id.as_str()))
            .collect();

        let skipped = target_ids.len() - plans.len();
        let saved = self.base.save_all(plans).await?;
        tracing::info!(owner_id, saved = saved.len(), skipped, "Batch saved plans for owner");
        Ok(saved)
    }

    /// Deletes an owner's associations with any of `target_ids`. Returns how
    /// many were removed.
    pub async fn batch_delete_for_owner(&self, owner_id: &str, target_ids: &[String]) -> Result<usize> {
        let targets: HashSet<&str> = target_ids.iter().map(String::as_str).collect();
        let plans: Vec<SavedPlan> = self
            .find_all_by_owner(owner_id)
            .await?
            .into_iter()
            .filter(|plan| targets.contains(plan.travel_plan_id.as_str()))
            .collect();

        if !plans.is_empty() {
            self.base.delete_all(&plans).await?;
            tracing::info!(owner_id, count = plans.len(), "Batch deleted saved plans for owner");
        }
        Ok(plans.len())
    }

    /// For each of `target_ids`, whether the owner has saved it.
    pub async fn check_multiple_associations_exist(
        &self,
        owner_id: &str,
        target_ids: &[String],
    ) -> Result<Vec<bool>> {
        let saved: HashSet<String> = self
            .get_saved_plan_ids(owner_id)
            .await?
            .into_iter()
            .collect();
        Ok(target_ids.iter().map(|id| saved.contains(id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use planvault_core::retry::RetryPolicy;
    use planvault_core::saved_plan::table_schema;
    use planvault_core::storage::StoreError;

    use super::*;
    use crate::storage::inmemory::{InMemoryStore, StoreOperation};

    const TABLE: &str = "saved_plans";

    async fn setup() -> (InMemoryStore, SavedPlanRepository) {
        let store = InMemoryStore::new().with_page_size(7);
        store.create_table(table_schema(TABLE)).await;
        let base = BaseRepository::new(
            Arc::new(store.clone()),
            TABLE,
            SavedPlanKeys,
            Arc::new(OperationMetrics::new()),
        )
        .with_retry_policy(RetryPolicy::new(
            3,
            Duration::from_millis(1),
            Duration::from_millis(5),
        ));
        (store, SavedPlanRepository::from_base(base))
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_exists_lifecycle() {
        let (_, repository) = setup().await;
        assert!(!repository.exists_by_owner_and_target("u1", "t1").await.unwrap());

        assert!(repository
            .find_by_owner_and_target("u1", "t1")
            .await
            .unwrap()
            .is_none());

        let saved = repository.save(SavedPlan::new("u1", "t1")).await.unwrap();
        assert!(repository.exists_by_owner_and_target("u1", "t1").await.unwrap());
        assert!(!repository.exists_by_owner_and_target("u1", "t2").await.unwrap());
        let found = repository
            .find_by_owner_and_target("u1", "t1")
            .await
            .unwrap()
            .expect("saved association");
        assert_eq!(found.id, saved.id);
        assert_eq!(found.user_id, "u1");
        assert_eq!(found.travel_plan_id, "t1");

        assert!(repository.delete_by_owner_and_target("u1", "t1").await.unwrap());
        assert!(!repository.exists_by_owner_and_target("u1", "t1").await.unwrap());
        assert!(repository
            .find_by_owner_and_target("u1", "t1")
            .await
            .unwrap()
            .is_none());
        assert!(!repository.delete_by_owner_and_target("u1", "t1").await.unwrap());
    }

    #[tokio::test]
    async fn test_find_by_owner_pages_and_counts() {
        let (_, repository) = setup().await;
        let plans: Vec<SavedPlan> = (0..30)
            .map(|i| SavedPlan::new(format!("owner{}", i % 3), format!("plan{:02}", i)))
            .collect();
        repository.save_all(plans).await.unwrap();

        let page = repository
            .find_by_owner("owner2", PageRequest::new(0, 5))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.total, 10);
        assert!(page.has_next());
        assert!(page.items.iter().all(|plan| plan.user_id == "owner2"));

        assert_eq!(repository.count_by_owner("owner2").await.unwrap(), 10);
        assert_eq!(repository.count().await.unwrap(), 30);

        assert_eq!(repository.delete_all_by_owner("owner2").await.unwrap(), 10);
        assert_eq!(repository.count_by_owner("owner2").await.unwrap(), 0);
        assert_eq!(repository.count().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_pair() {
        let (_, repository) = setup().await;
        let first = repository.create(SavedPlan::new("u1", "t1")).await.unwrap();

        let err = repository
            .create(SavedPlan::new("u1", "t1"))
            .await
            .unwrap_err();

        match err {
            RepositoryError::AlreadyExists { entity_type, id } => {
                assert_eq!(entity_type, "SavedPlan");
                assert_eq!(id, first.id);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_duplicates_are_all_visible() {
        let (_, repository) = setup().await;
        repository
            .save_all(vec![
                SavedPlan::new("u1", "t1").with_id("a"),
                SavedPlan::new("u1", "t1").with_id("b"),
            ])
            .await
            .unwrap();

        let all = repository
            .find_all_by_owner_and_target("u1", "t1")
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(repository
            .find_by_owner_and_target("u1", "t1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_favorites_and_notes_search() {
        let (_, repository) = setup().await;
        let mut removed = SavedPlan::new("u1", "t3").with_favorite(true);
        removed.soft_delete(Utc::now());
        repository
            .save_all(vec![
                SavedPlan::new("u1", "t1").with_favorite(true),
                SavedPlan::new("u1", "t2").with_notes("beach trip in june"),
                removed,
                SavedPlan::new("u2", "t1").with_favorite(true),
            ])
            .await
            .unwrap();

        let favorites = repository.find_favorites_by_owner("u1").await.unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].travel_plan_id, "t1");

        let found = repository.search_notes_by_owner("u1", "beach").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].travel_plan_id, "t2");
        assert!(repository
            .search_notes_by_owner("u1", "mountain")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_all_by_target() {
        let (store, repository) = setup().await;
        for owner in ["u1", "u2", "u3"] {
            repository.save(SavedPlan::new(owner, "doomed")).await.unwrap();
            repository.save(SavedPlan::new(owner, "kept")).await.unwrap();
        }

        assert_eq!(repository.delete_all_by_target("doomed").await.unwrap(), 3);
        assert_eq!(store.item_count(TABLE).await, 3);
        assert!(repository
            .find_all()
            .await
            .unwrap()
            .iter()
            .all(|plan| plan.travel_plan_id == "kept"));
    }

    #[tokio::test]
    async fn test_batch_save_skips_existing_and_repeats() {
        let (_, repository) = setup().await;
        repository.save(SavedPlan::new("u1", "t1")).await.unwrap();

        let saved = repository
            .batch_save_for_owner("u1", &ids(&["t1", "t2", "t3", "t2"]))
            .await
            .unwrap();

        let mut targets: Vec<String> = saved.into_iter().map(|p| p.travel_plan_id).collect();
        targets.sort();
        assert_eq!(targets, ids(&["t2", "t3"]));

        let mut saved_ids = repository.get_saved_plan_ids("u1").await.unwrap();
        saved_ids.sort();
        assert_eq!(saved_ids, ids(&["t1", "t2", "t3"]));
    }

    #[tokio::test]
    async fn test_batch_delete_and_check_multiple() {
        let (_, repository) = setup().await;
        repository
            .batch_save_for_owner("u1", &ids(&["t1", "t2", "t3"]))
            .await
            .unwrap();

        let removed = repository
            .batch_delete_for_owner("u1", &ids(&["t1", "t3", "t9"]))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let exists = repository
            .check_multiple_associations_exist("u1", &ids(&["t1", "t2", "t3"]))
            .await
            .unwrap();
        assert_eq!(exists, vec![false, true, false]);
    }

    #[tokio::test]
    async fn test_find_all_by_id_and_delete_all_by_id() {
        let (_, repository) = setup().await;
        let saved = repository
            .batch_save_for_owner("u1", &ids(&["t1", "t2", "t3"]))
            .await
            .unwrap();
        let plan_ids: Vec<String> = saved.iter().map(|p| p.id.clone()).collect();

        let mut lookup = plan_ids.clone();
        lookup.push("missing".to_string());
        assert_eq!(repository.find_all_by_id(&lookup).await.unwrap().len(), 3);

        repository.delete_all_by_id(&plan_ids[..2]).await.unwrap();
        assert_eq!(repository.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_owner_query_failure_surfaces_operation() {
        let (store, repository) = setup().await;
        store
            .fail_next(StoreOperation::Query, StoreError::Validation("bad index".into()))
            .await;

        let err = repository
            .find_by_owner("u1", PageRequest::default())
            .await
            .unwrap_err();

        assert_eq!(err.operation(), Some("query_index"));
        assert_eq!(err.table(), Some(TABLE));
    }
}
