pub use crate::id::{Id, RoomId, UserId};
pub use crate::time::{now_ms, Timestamp};
