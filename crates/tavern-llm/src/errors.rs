use tavern_errors::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct LlmError(pub Box<ErrorObj>);

impl LlmError {
    pub fn into_inner(self) -> ErrorObj {
        *self.0
    }

    pub fn no_credential(detail: &str) -> Self {
        LlmError(Box::new(
            ErrorBuilder::new(codes::CONFIG_MISSING)
                .user_msg("No usable provider credential.")
                .dev_msg(detail)
                .build(),
        ))
    }

    pub fn provider_unavailable(detail: &str) -> Self {
        LlmError(Box::new(
            ErrorBuilder::new(codes::PROVIDER_UNAVAILABLE)
                .user_msg("Model provider is unavailable.")
                .dev_msg(detail)
                .build(),
        ))
    }

    pub fn schema(detail: &str) -> Self {
        LlmError(Box::new(
            ErrorBuilder::new(codes::SCHEMA_VALIDATION)
                .user_msg("Provider request failed validation.")
                .dev_msg(detail)
                .build(),
        ))
    }

    pub fn unknown(detail: &str) -> Self {
        LlmError(Box::new(
            ErrorBuilder::new(codes::UNKNOWN_INTERNAL)
                .user_msg("Model call failed.")
                .dev_msg(detail)
                .build(),
        ))
    }
}

impl From<LlmError> for ErrorObj {
    fn from(value: LlmError) -> Self {
        value.into_inner()
    }
}
