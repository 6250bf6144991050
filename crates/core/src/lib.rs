//! Store-agnostic building blocks of the planvault data-access layer.
//!
//! - [`storage`]: item model, adapter trait, expressions, pagination, errors
//! - [`retry`]: exponential backoff for throttled calls
//! - [`metrics`]: per-operation latency, error and capacity counters
//! - [`saved_plan`]: the saved-plan association and its item mapping

pub mod metrics;
pub mod retry;
pub mod saved_plan;
pub mod storage;
