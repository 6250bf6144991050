//! Store adapter implementations.
//!
//! This module provides concrete implementations of the `KeyValueStore`
//! trait defined in `planvault_core::storage`.
//!
//! # Feature Flags
//!
//! - `dynamodb` (default): AWS DynamoDB adapter using `aws-sdk-dynamodb`
//!
//! The in-memory adapter is always compiled; it backs the test suite and
//! local experimentation.
//!
//! # Examples
//!
//! Build without DynamoDB:
//! ```bash
//! cargo build -p planvault --no-default-features
//! ```

#[cfg(feature = "dynamodb")]
pub mod dynamodb;

pub mod inmemory;

#[cfg(feature = "dynamodb")]
pub use dynamodb::DynamoDbStore;

pub use inmemory::InMemoryStore;
