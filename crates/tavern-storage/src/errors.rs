use tavern_errors::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct StorageError(pub Box<ErrorObj>);

impl StorageError {
    pub fn into_inner(self) -> ErrorObj {
        *self.0
    }

    pub fn not_found(detail: &str) -> Self {
        StorageError(Box::new(
            ErrorBuilder::new(codes::STORAGE_NOT_FOUND)
                .user_msg("Record not found.")
                .dev_msg(detail)
                .build(),
        ))
    }

    pub fn bad_request(detail: &str) -> Self {
        StorageError(Box::new(
            ErrorBuilder::new(codes::SCHEMA_VALIDATION)
                .user_msg("Storage request is invalid.")
                .dev_msg(detail)
                .build(),
        ))
    }

    pub fn unavailable(detail: &str) -> Self {
        StorageError(Box::new(
            ErrorBuilder::new(codes::STORAGE_UNAVAILABLE)
                .user_msg("Storage backend is unavailable.")
                .dev_msg(detail)
                .build(),
        ))
    }

    pub fn unknown(detail: &str) -> Self {
        StorageError(Box::new(
            ErrorBuilder::new(codes::UNKNOWN_INTERNAL)
                .user_msg("Storage operation failed.")
                .dev_msg(detail)
                .build(),
        ))
    }
}

impl From<StorageError> for ErrorObj {
    fn from(value: StorageError) -> Self {
        value.into_inner()
    }
}
