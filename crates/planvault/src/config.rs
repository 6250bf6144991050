use std::{env, time::Duration};

use planvault_core::retry::RetryPolicy;
use planvault_core::storage::{BatchLimits, ReadConsistency};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Prefix prepended to table names (default: "planvault_")
    pub table_prefix: String,
    /// Saved-plan table name (default: "<prefix>saved_plans")
    pub saved_plans_table: String,
    /// AWS region (default: "us-east-1")
    pub region: String,
    /// Custom endpoint URL, e.g. for local DynamoDB
    pub endpoint_url: Option<String>,
    /// Total attempts per store call, including the first (default: 3)
    pub max_attempts: u32,
    /// First backoff in milliseconds (default: 100)
    pub initial_backoff_ms: u64,
    /// Backoff cap in milliseconds (default: 10,000)
    pub max_backoff_ms: u64,
    /// Keys per batch-get call (default: 100)
    pub read_batch_limit: usize,
    /// Requests per batch-write call (default: 25)
    pub write_batch_limit: usize,
    /// Use strongly consistent reads (default: false)
    pub consistent_reads: bool,
    /// Create missing tables on startup (default: false)
    pub create_tables: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PLANVAULT_TABLE_PREFIX` - Table name prefix (default: "planvault_")
    /// - `PLANVAULT_SAVED_PLANS_TABLE` - Saved-plan table (default: "<prefix>saved_plans")
    /// - `AWS_REGION` - AWS region (default: "us-east-1")
    /// - `AWS_ENDPOINT_URL` - Custom endpoint (default: unset)
    /// - `PLANVAULT_MAX_ATTEMPTS` - Retry attempts (default: 3)
    /// - `PLANVAULT_INITIAL_BACKOFF_MS` - First backoff (default: 100)
    /// - `PLANVAULT_MAX_BACKOFF_MS` - Backoff cap (default: 10,000)
    /// - `PLANVAULT_READ_BATCH_LIMIT` - Batch-get size (default: 100)
    /// - `PLANVAULT_WRITE_BATCH_LIMIT` - Batch-write size (default: 25)
    /// - `PLANVAULT_CONSISTENT_READS` - Strong reads (default: false)
    /// - `PLANVAULT_CREATE_TABLES` - Create tables on startup (default: false)
    pub fn from_env() -> Self {
        let table_prefix =
            env::var("PLANVAULT_TABLE_PREFIX").unwrap_or_else(|_| "planvault_".to_string());
        let saved_plans_table = env::var("PLANVAULT_SAVED_PLANS_TABLE")
            .unwrap_or_else(|_| format!("{}saved_plans", table_prefix));

        Self {
            table_prefix,
            saved_plans_table,
            region: env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint_url: env::var("AWS_ENDPOINT_URL").ok(),
            max_attempts: parse_var("PLANVAULT_MAX_ATTEMPTS").unwrap_or(3),
            initial_backoff_ms: parse_var("PLANVAULT_INITIAL_BACKOFF_MS").unwrap_or(100),
            max_backoff_ms: parse_var("PLANVAULT_MAX_BACKOFF_MS").unwrap_or(10_000),
            read_batch_limit: parse_var("PLANVAULT_READ_BATCH_LIMIT").unwrap_or(100),
            write_batch_limit: parse_var("PLANVAULT_WRITE_BATCH_LIMIT").unwrap_or(25),
            consistent_reads: parse_var("PLANVAULT_CONSISTENT_READS").unwrap_or(false),
            create_tables: parse_var("PLANVAULT_CREATE_TABLES").unwrap_or(false),
        }
    }

    /// Retry policy built from the backoff settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }

    /// Batch limits, clamped to the store maxima.
    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits::new(self.read_batch_limit, self.write_batch_limit)
    }

    pub fn read_consistency(&self) -> ReadConsistency {
        if self.consistent_reads {
            ReadConsistency::Strong
        } else {
            ReadConsistency::Eventual
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
