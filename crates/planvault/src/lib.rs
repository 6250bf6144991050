//! Planvault data-access layer.
//!
//! Store adapters, the generic repository and the saved-plan repository,
//! built on the store-agnostic types in `planvault_core`.

pub mod config;
pub mod repository;
pub mod storage;

pub use config::Config;
pub use repository::{BaseRepository, SavedPlanKeys, SavedPlanRepository};
