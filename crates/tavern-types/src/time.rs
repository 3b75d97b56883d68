use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64); // ms since epoch, UTC

pub fn now_ms() -> Timestamp {
    Timestamp(chrono::Utc::now().timestamp_millis())
}
