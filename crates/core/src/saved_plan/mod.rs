mod item;
mod types;

pub use item::{
    item_to_saved_plan, saved_plan_to_item, table_schema, ATTR_CREATED_AT, ATTR_DELETED_AT,
    ATTR_ENTITY_TYPE, ATTR_ID, ATTR_IS_DELETED, ATTR_IS_FAVORITE, ATTR_NOTES,
    ATTR_NOTIFICATION_ENABLED, ATTR_SAVED_AT, ATTR_TRAVEL_PLAN_ID, ATTR_UPDATED_AT, ATTR_USER_ID,
    ENTITY_TYPE_SAVED_PLAN, OWNER_INDEX,
};
pub use types::SavedPlan;
