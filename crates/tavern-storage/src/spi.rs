use async_trait::async_trait;
use tavern_types::prelude::{RoomId, UserId};

use crate::errors::StorageError;
use crate::model::{
    FoodBalance, FoodTransaction, MessageCost, MessageRecord, MindBlock, ModelConfig, Role,
};

/// Outcome of the conditional balance decrement.
#[derive(Clone, Debug, PartialEq)]
pub enum DebitOutcome {
    Applied(FoodBalance),
    /// Zero rows matched the `current_balance >= amount` condition.
    Insufficient,
}

#[derive(Clone, Copy, Debug)]
pub struct StoreCaps {
    /// Backend can decrement-if-sufficient in one conditional statement.
    pub atomic_debit: bool,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn user_for_session(&self, token: &str) -> Result<Option<UserId>, StorageError>;

    async fn role_by_id(&self, id: &str) -> Result<Option<Role>, StorageError>;
    async fn role_by_slug(&self, slug: &str) -> Result<Option<Role>, StorageError>;

    /// Batch lookup; absence of any id is the caller's concern.
    async fn models_by_ids(&self, ids: &[String]) -> Result<Vec<ModelConfig>, StorageError>;

    /// Equipped blocks for (user, role), in equip insertion order.
    async fn equipped_mind_blocks(
        &self,
        user: &UserId,
        role_id: &str,
    ) -> Result<Vec<MindBlock>, StorageError>;

    /// Most recent messages for a room, newest first.
    async fn recent_messages(
        &self,
        room: &RoomId,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StorageError>;

    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StorageError>;

    /// `None` when the user has no balance row yet.
    async fn balance(&self, user: &UserId) -> Result<Option<FoodBalance>, StorageError>;

    /// Atomic conditional decrement. Also bumps `total_spent` on success.
    async fn debit_if_sufficient(
        &self,
        user: &UserId,
        amount: i64,
    ) -> Result<DebitOutcome, StorageError>;

    /// Non-atomic read-then-write decrement, kept only as the degraded
    /// fallback for backends without a conditional update.
    async fn debit_unchecked(&self, user: &UserId, amount: i64)
        -> Result<FoodBalance, StorageError>;

    async fn insert_transaction(&self, tx: &FoodTransaction) -> Result<(), StorageError>;
    async fn insert_cost(&self, cost: &MessageCost) -> Result<(), StorageError>;

    fn caps(&self) -> StoreCaps;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` under `path` and returns a public URL for it.
    async fn put_public(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError>;
}
