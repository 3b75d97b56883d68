pub use crate::errors::StorageError;
pub use crate::memory::{MemoryObjectStore, MemoryStore};
pub use crate::model::{
    FoodBalance, FoodTransaction, MessageCost, MessageRecord, MindBlock, ModelConfig, Role,
    SenderType,
};
pub use crate::rest::{RestConfig, RestStore};
pub use crate::spi::{ChatStore, DebitOutcome, ObjectStore, StoreCaps};
