use thiserror::Error;

use crate::retry::Retryable;

/// Errors surfaced by a key-value store adapter.
///
/// Adapters translate their SDK's failures into this taxonomy; nothing above
/// the adapter inspects SDK error types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Provisioned throughput exceeded: {0}")]
    ProvisionedThroughputExceeded(String),
    #[error("Request limit exceeded: {0}")]
    RequestLimitExceeded(String),
    #[error("Throttled: {0}")]
    Throttled(String),
    #[error("{count} batch entries were not processed")]
    Unprocessed { count: usize },
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),
    #[error("Conditional check failed: {0}")]
    ConditionalCheckFailed(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Store error: {0}")]
    Other(String),
}

impl StoreError {
    /// True for the throttling class: capacity exceeded, rate limited,
    /// request limit exceeded, or batch entries left unprocessed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::ProvisionedThroughputExceeded(_)
                | StoreError::RequestLimitExceeded(_)
                | StoreError::Throttled(_)
                | StoreError::Unprocessed { .. }
        )
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        StoreError::is_retryable(self)
    }
}

/// Result type for adapter calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by repositories.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("{operation} on table {table} failed after {attempts} attempt(s): {source}")]
    OperationFailed {
        operation: &'static str,
        table: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },
    #[error("{operation} on table {table} was cancelled")]
    Cancelled {
        operation: &'static str,
        table: String,
    },
    #[error("{entity_type} already exists: {id}")]
    AlreadyExists {
        entity_type: &'static str,
        id: String,
    },
}

impl RepositoryError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RepositoryError::Cancelled { .. })
    }

    /// Name of the failing repository operation, if any.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            RepositoryError::OperationFailed { operation, .. }
            | RepositoryError::Cancelled { operation, .. } => Some(operation),
            RepositoryError::AlreadyExists { .. } => None,
        }
    }

    pub fn table(&self) -> Option<&str> {
        match self {
            RepositoryError::OperationFailed { table, .. }
            | RepositoryError::Cancelled { table, .. } => Some(table),
            RepositoryError::AlreadyExists { .. } => None,
        }
    }

    /// The underlying store error, if the failure came from the store.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            RepositoryError::OperationFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttling_class_is_retryable() {
        assert!(StoreError::ProvisionedThroughputExceeded("x".into()).is_retryable());
        assert!(StoreError::RequestLimitExceeded("x".into()).is_retryable());
        assert!(StoreError::Throttled("x".into()).is_retryable());
        assert!(StoreError::Unprocessed { count: 3 }.is_retryable());
    }

    #[test]
    fn test_other_errors_are_not_retryable() {
        assert!(!StoreError::Validation("bad key".into()).is_retryable());
        assert!(!StoreError::ResourceNotFound("t".into()).is_retryable());
        assert!(!StoreError::ConditionalCheckFailed("c".into()).is_retryable());
        assert!(!StoreError::Internal("boom".into()).is_retryable());
        assert!(!StoreError::ConnectionFailed("refused".into()).is_retryable());
    }

    #[test]
    fn test_store_error_unprocessed_display() {
        let error = StoreError::Unprocessed { count: 4 };
        assert_eq!(error.to_string(), "4 batch entries were not processed");
    }

    #[test]
    fn test_repository_error_operation_failed_display() {
        let error = RepositoryError::OperationFailed {
            operation: "save",
            table: "saved_plans".to_string(),
            attempts: 3,
            source: StoreError::Throttled("slow down".to_string()),
        };
        assert_eq!(
            error.to_string(),
            "save on table saved_plans failed after 3 attempt(s): Throttled: slow down"
        );
        assert_eq!(error.operation(), Some("save"));
        assert_eq!(error.table(), Some("saved_plans"));
        assert!(error.store_error().is_some());
    }

    #[test]
    fn test_repository_error_cancelled_display() {
        let error = RepositoryError::Cancelled {
            operation: "find_by_id",
            table: "saved_plans".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "find_by_id on table saved_plans was cancelled"
        );
        assert!(error.is_cancelled());
        assert!(error.store_error().is_none());
    }

    #[test]
    fn test_repository_error_already_exists_display() {
        let error = RepositoryError::AlreadyExists {
            entity_type: "SavedPlan",
            id: "u1/t1".to_string(),
        };
        assert_eq!(error.to_string(), "SavedPlan already exists: u1/t1");
    }
}
