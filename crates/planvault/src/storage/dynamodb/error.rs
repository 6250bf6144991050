//! DynamoDB error mapping.
//!
//! Maps AWS SDK errors to `StoreError` from `planvault_core::storage`. Service
//! errors are classified by their error code, so one function covers every
//! operation.

use std::fmt::Debug;

use aws_sdk_dynamodb::error::{BuildError, DisplayErrorContext, ProvideErrorMetadata, SdkError};
use planvault_core::storage::StoreError;

/// Map any SDK operation error to StoreError.
pub fn map_sdk_error<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: Debug,
{
    match &err {
        SdkError::ServiceError(service) => {
            let inner = service.err();
            classify_code(inner.code(), inner.message().unwrap_or_default())
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StoreError::ConnectionFailed(DisplayErrorContext(&err).to_string())
        }
        SdkError::ConstructionFailure(_) => {
            StoreError::Validation(DisplayErrorContext(&err).to_string())
        }
        _ => StoreError::Other(DisplayErrorContext(&err).to_string()),
    }
}

/// Map a request builder error to StoreError.
pub fn map_build_error(err: BuildError) -> StoreError {
    StoreError::Validation(err.to_string())
}

/// Classify a DynamoDB error code.
pub fn classify_code(code: Option<&str>, message: &str) -> StoreError {
    let message = message.to_string();
    match code {
        Some("ProvisionedThroughputExceededException") => {
            StoreError::ProvisionedThroughputExceeded(message)
        }
        Some("RequestLimitExceeded") => StoreError::RequestLimitExceeded(message),
        Some("ThrottlingException" | "Throttling" | "TooManyRequestsException") => {
            StoreError::Throttled(message)
        }
        Some("ValidationException" | "SerializationException") => StoreError::Validation(message),
        Some("ResourceNotFoundException") => StoreError::ResourceNotFound(message),
        Some("ConditionalCheckFailedException") => StoreError::ConditionalCheckFailed(message),
        Some("InternalServerError" | "ServiceUnavailable") => StoreError::Internal(message),
        Some(other) => StoreError::Other(format!("{}: {}", other, message)),
        None => StoreError::Other(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttling_codes_are_retryable() {
        for code in [
            "ProvisionedThroughputExceededException",
            "RequestLimitExceeded",
            "ThrottlingException",
        ] {
            let error = classify_code(Some(code), "slow down");
            assert!(error.is_retryable(), "{code} should be retryable");
        }
    }

    #[test]
    fn test_validation_and_missing_table() {
        assert_eq!(
            classify_code(Some("ValidationException"), "bad key"),
            StoreError::Validation("bad key".to_string())
        );
        assert_eq!(
            classify_code(Some("ResourceNotFoundException"), "no table"),
            StoreError::ResourceNotFound("no table".to_string())
        );
        assert!(!classify_code(Some("ValidationException"), "bad key").is_retryable());
    }

    #[test]
    fn test_unknown_code_keeps_the_code() {
        assert_eq!(
            classify_code(Some("AccessDeniedException"), "denied"),
            StoreError::Other("AccessDeniedException: denied".to_string())
        );
        assert_eq!(
            classify_code(None, "mystery"),
            StoreError::Other("mystery".to_string())
        );
    }
}
