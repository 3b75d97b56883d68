pub use crate::codes::{self, ErrorCode, RetryAdvice};
pub use crate::model::{ErrorBuilder, ErrorObj, PublicErrorView};
