use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user's bookmark of a travel plan.
///
/// Identified by an opaque `id`; logically unique per `(user_id, travel_plan_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedPlan {
    pub id: String,
    pub user_id: String,
    pub travel_plan_id: String,
    pub saved_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub is_favorite: bool,
    pub notification_enabled: bool,
    /// Soft-delete flag.
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SavedPlan {
    /// Creates a new association with a fresh id, saved now.
    pub fn new(user_id: impl Into<String>, travel_plan_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            travel_plan_id: travel_plan_id.into(),
            saved_at: Utc::now(),
            notes: None,
            is_favorite: false,
            notification_enabled: true,
            is_deleted: false,
            deleted_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_favorite(mut self, is_favorite: bool) -> Self {
        self.is_favorite = is_favorite;
        self
    }

    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notification_enabled = enabled;
        self
    }

    /// Sets a specific ID (useful for testing).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Marks the association deleted without removing it.
    pub fn soft_delete(&mut self, at: DateTime<Utc>) {
        self.is_deleted = true;
        self.deleted_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults() {
        let plan = SavedPlan::new("u1", "t1");
        assert!(Uuid::parse_str(&plan.id).is_ok());
        assert!(plan.notification_enabled);
        assert!(!plan.is_favorite);
        assert!(!plan.is_deleted);
        assert!(plan.created_at.is_none());
        assert!(!SavedPlan::new("u1", "t1")
            .with_notifications(false)
            .notification_enabled);
    }

    #[test]
    fn test_soft_delete() {
        let mut plan = SavedPlan::new("u1", "t1");
        let now = Utc::now();
        plan.soft_delete(now);
        assert!(plan.is_deleted);
        assert_eq!(plan.deleted_at, Some(now));
    }

    #[test]
    fn test_serializes_camel_case() {
        let plan = SavedPlan::new("u1", "t1").with_id("p1").with_favorite(true);
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["travelPlanId"], "t1");
        assert_eq!(json["isFavorite"], true);
    }
}
