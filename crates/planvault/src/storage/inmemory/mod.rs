//! In-memory storage backend for testing.
//!
//! This module provides an in-memory implementation of `KeyValueStore` that
//! keeps tables in `BTreeMap`s behind an `Arc<RwLock<_>>`. It is useful for
//! testing and development scenarios where persistence is not required.
//!
//! # Example
//!
//! ```rust,ignore
//! use planvault::storage::inmemory::InMemoryStore;
//!
//! let store = InMemoryStore::new();
//! store.create_table(planvault_core::saved_plan::table_schema("plans")).await;
//! ```

mod store;

pub use store::{InMemoryStore, StoreOperation, DEFAULT_PAGE_SIZE};
