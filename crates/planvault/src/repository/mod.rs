//! Repositories over a `KeyValueStore`.
//!
//! - [`BaseRepository`]: generic CRUD, batch, scan and query operations with
//!   retries, metrics and client-side pagination.
//! - [`SavedPlanRepository`]: user ↔ travel plan associations.
//!
//! Filter expressions are built with the helpers re-exported here
//! (`equal`, `contains`, `not_deleted`, `combine`).

mod base;
mod saved_plan;

pub use base::{collect_all, first_n, paginate, BaseRepository, EntityStream};
pub use planvault_core::storage::expression::{combine, contains, equal, not_deleted};
pub use saved_plan::{SavedPlanKeys, SavedPlanRepository};
