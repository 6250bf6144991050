//! Item mapping and table layout for saved plans.

use chrono::{DateTime, Utc};

use crate::storage::{
    get_bool, get_datetime, get_optional_datetime, get_optional_string, get_string, put_datetime,
    put_optional_string, AttrValue, Entity, Item, KeyAttributes, StoreError, StoreResult,
    TableSchema, Timestamped, DELETED_ATTRIBUTE,
};

use super::SavedPlan;

pub const ENTITY_TYPE_SAVED_PLAN: &str = "SAVED_PLAN";

pub const ATTR_ID: &str = "id";
pub const ATTR_USER_ID: &str = "userId";
pub const ATTR_TRAVEL_PLAN_ID: &str = "travelPlanId";
pub const ATTR_SAVED_AT: &str = "savedAt";
pub const ATTR_NOTES: &str = "notes";
pub const ATTR_IS_FAVORITE: &str = "isFavorite";
pub const ATTR_NOTIFICATION_ENABLED: &str = "notificationEnabled";
pub const ATTR_IS_DELETED: &str = DELETED_ATTRIBUTE;
pub const ATTR_DELETED_AT: &str = "deletedAt";
pub const ATTR_CREATED_AT: &str = "createdAt";
pub const ATTR_UPDATED_AT: &str = "updatedAt";
pub const ATTR_ENTITY_TYPE: &str = "entityType";

/// Secondary index for user-scoped listing.
pub const OWNER_INDEX: &str = "userId-index";

/// Table layout: primary key `id`, owner index on `userId` / `travelPlanId`.
pub fn table_schema(table_name: impl Into<String>) -> TableSchema {
    TableSchema::new(table_name, KeyAttributes::new(ATTR_ID)).with_index(
        OWNER_INDEX,
        KeyAttributes::new(ATTR_USER_ID).with_sort_key(ATTR_TRAVEL_PLAN_ID),
    )
}

/// Convert a SavedPlan to a store item.
pub fn saved_plan_to_item(plan: &SavedPlan) -> Item {
    let mut item = Item::new();

    item.insert(
        ATTR_ENTITY_TYPE.to_string(),
        AttrValue::S(ENTITY_TYPE_SAVED_PLAN.to_string()),
    );

    item.insert(ATTR_ID.to_string(), AttrValue::S(plan.id.clone()));
    item.insert(ATTR_USER_ID.to_string(), AttrValue::S(plan.user_id.clone()));
    item.insert(
        ATTR_TRAVEL_PLAN_ID.to_string(),
        AttrValue::S(plan.travel_plan_id.clone()),
    );
    put_datetime(&mut item, ATTR_SAVED_AT, plan.saved_at);
    put_optional_string(&mut item, ATTR_NOTES, plan.notes.as_deref());
    item.insert(ATTR_IS_FAVORITE.to_string(), AttrValue::Bool(plan.is_favorite));
    item.insert(
        ATTR_NOTIFICATION_ENABLED.to_string(),
        AttrValue::Bool(plan.notification_enabled),
    );
    item.insert(ATTR_IS_DELETED.to_string(), AttrValue::Bool(plan.is_deleted));
    if let Some(deleted_at) = plan.deleted_at {
        put_datetime(&mut item, ATTR_DELETED_AT, deleted_at);
    }
    if let Some(created_at) = plan.created_at {
        put_datetime(&mut item, ATTR_CREATED_AT, created_at);
    }
    if let Some(updated_at) = plan.updated_at {
        put_datetime(&mut item, ATTR_UPDATED_AT, updated_at);
    }

    item
}

/// Convert a store item to a SavedPlan.
pub fn item_to_saved_plan(item: &Item) -> StoreResult<SavedPlan> {
    if let Some(entity_type) = get_optional_string(item, ATTR_ENTITY_TYPE) {
        if entity_type != ENTITY_TYPE_SAVED_PLAN {
            return Err(StoreError::InvalidData(format!(
                "Unexpected entity type: {}",
                entity_type
            )));
        }
    }

    Ok(SavedPlan {
        id: get_string(item, ATTR_ID)?,
        user_id: get_string(item, ATTR_USER_ID)?,
        travel_plan_id: get_string(item, ATTR_TRAVEL_PLAN_ID)?,
        saved_at: get_datetime(item, ATTR_SAVED_AT)?,
        notes: get_optional_string(item, ATTR_NOTES),
        is_favorite: get_bool(item, ATTR_IS_FAVORITE, false)?,
        notification_enabled: get_bool(item, ATTR_NOTIFICATION_ENABLED, true)?,
        is_deleted: get_bool(item, ATTR_IS_DELETED, false)?,
        deleted_at: get_optional_datetime(item, ATTR_DELETED_AT)?,
        created_at: get_optional_datetime(item, ATTR_CREATED_AT)?,
        updated_at: get_optional_datetime(item, ATTR_UPDATED_AT)?,
    })
}

impl Timestamped for SavedPlan {
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

impl Entity for SavedPlan {
    const ENTITY_TYPE: &'static str = "SavedPlan";

    fn to_item(&self) -> Item {
        saved_plan_to_item(self)
    }

    fn from_item(item: &Item) -> StoreResult<Self> {
        item_to_saved_plan(item)
    }
}
