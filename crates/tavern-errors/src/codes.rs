use serde::{Deserialize, Serialize};

/// What a caller can usefully do after a failure with this code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryAdvice {
    /// Retrying the same request will not change the outcome.
    No,
    /// Transient upstream or storage trouble; retry with backoff.
    Backoff,
    /// Retry once the food balance has been topped up.
    TopUp,
}

impl RetryAdvice {
    pub const fn as_str(self) -> &'static str {
        match self {
            RetryAdvice::No => "no",
            RetryAdvice::Backoff => "backoff",
            RetryAdvice::TopUp => "top_up",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorCode {
    pub code: &'static str,
    pub http_status: u16,
    pub retry: RetryAdvice,
}

pub const AUTH_UNAUTHENTICATED: ErrorCode = ErrorCode {
    code: "AUTH.UNAUTHENTICATED",
    http_status: 401,
    retry: RetryAdvice::No,
};

pub const SCHEMA_VALIDATION: ErrorCode = ErrorCode {
    code: "SCHEMA.VALIDATION",
    http_status: 400,
    retry: RetryAdvice::No,
};

pub const CONFIG_MISSING: ErrorCode = ErrorCode {
    code: "CONFIG.MISSING",
    http_status: 500,
    retry: RetryAdvice::No,
};

pub const BALANCE_INSUFFICIENT: ErrorCode = ErrorCode {
    code: "BALANCE.INSUFFICIENT",
    http_status: 402,
    retry: RetryAdvice::TopUp,
};

pub const PROVIDER_UNAVAILABLE: ErrorCode = ErrorCode {
    code: "PROVIDER.UNAVAILABLE",
    http_status: 502,
    retry: RetryAdvice::Backoff,
};

pub const UPLOAD_FAILED: ErrorCode = ErrorCode {
    code: "UPLOAD.FAILED",
    http_status: 502,
    retry: RetryAdvice::Backoff,
};

pub const BILLING_FAILED: ErrorCode = ErrorCode {
    code: "BILLING.FAILED",
    http_status: 500,
    retry: RetryAdvice::Backoff,
};

pub const STORAGE_NOT_FOUND: ErrorCode = ErrorCode {
    code: "STORAGE.NOT_FOUND",
    http_status: 404,
    retry: RetryAdvice::No,
};

pub const STORAGE_UNAVAILABLE: ErrorCode = ErrorCode {
    code: "STORAGE.UNAVAILABLE",
    http_status: 503,
    retry: RetryAdvice::Backoff,
};

pub const UNKNOWN_INTERNAL: ErrorCode = ErrorCode {
    code: "UNKNOWN.INTERNAL",
    http_status: 500,
    retry: RetryAdvice::No,
};
