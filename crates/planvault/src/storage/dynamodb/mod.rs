//! DynamoDB storage backend implementation.
//!
//! This module provides a DynamoDB-based implementation of `KeyValueStore`
//! using `aws-sdk-dynamodb`.

mod client;
mod conversions;
mod error;
mod store;

pub use client::{create_client, AwsConfig};
pub use error::{classify_code, map_sdk_error};
pub use store::DynamoDbStore;
