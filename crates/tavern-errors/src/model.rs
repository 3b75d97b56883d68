use serde::{Deserialize, Serialize};

use crate::codes::{ErrorCode, RetryAdvice};

/// Canonical error payload shared by every crate in the workspace.
///
/// `user_msg` is safe to surface over the wire; `dev_msg` stays in logs.
#[derive(Clone, Debug)]
pub struct ErrorObj {
    pub code: ErrorCode,
    pub user_msg: String,
    pub dev_msg: Option<String>,
    pub meta: serde_json::Value,
}

impl ErrorObj {
    pub fn to_public(&self) -> PublicErrorView {
        PublicErrorView {
            code: self.code.code.to_string(),
            message: self.user_msg.clone(),
            retry: self.code.retry.as_str().to_string(),
        }
    }

    pub fn http_status(&self) -> u16 {
        self.code.http_status
    }

    pub fn retry(&self) -> RetryAdvice {
        self.code.retry
    }
}

impl std::fmt::Display for ErrorObj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.dev_msg.as_deref() {
            Some(dev) => write!(f, "{}: {}", self.code.code, dev),
            None => write!(f, "{}: {}", self.code.code, self.user_msg),
        }
    }
}

/// The redacted view returned to callers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublicErrorView {
    pub code: String,
    pub message: String,
    pub retry: String,
}

pub struct ErrorBuilder {
    code: ErrorCode,
    user_msg: Option<String>,
    dev_msg: Option<String>,
    meta: serde_json::Value,
}

impl ErrorBuilder {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            user_msg: None,
            dev_msg: None,
            meta: serde_json::Value::Null,
        }
    }

    pub fn user_msg(mut self, msg: impl Into<String>) -> Self {
        self.user_msg = Some(msg.into());
        self
    }

    pub fn dev_msg(mut self, msg: impl Into<String>) -> Self {
        self.dev_msg = Some(msg.into());
        self
    }

    pub fn meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }

    pub fn build(self) -> ErrorObj {
        ErrorObj {
            code: self.code,
            user_msg: self
                .user_msg
                .unwrap_or_else(|| "Request failed.".to_string()),
            dev_msg: self.dev_msg,
            meta: self.meta,
        }
    }
}
