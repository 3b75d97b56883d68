use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tavern_types::prelude::{RoomId, UserId};

use crate::errors::StorageError;
use crate::model::{
    FoodBalance, FoodTransaction, MessageCost, MessageRecord, MindBlock, ModelConfig, Role,
};
use crate::spi::{ChatStore, DebitOutcome, ObjectStore, StoreCaps};

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, UserId>,
    roles: Vec<Role>,
    models: HashMap<String, ModelConfig>,
    /// Equip relation in insertion order.
    equips: Vec<(UserId, String, MindBlock)>,
    messages: Vec<MessageRecord>,
    balances: HashMap<UserId, FoodBalance>,
    transactions: Vec<FoodTransaction>,
    costs: Vec<MessageCost>,
}

/// In-memory backend for tests and local runs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    atomic_debit: Arc<std::sync::atomic::AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let store = Self::default();
        store
            .atomic_debit
            .store(true, std::sync::atomic::Ordering::Relaxed);
        store
    }

    /// Pretend the backend has no conditional update, to exercise the
    /// degraded billing path.
    pub fn without_atomic_debit(self) -> Self {
        self.atomic_debit
            .store(false, std::sync::atomic::Ordering::Relaxed);
        self
    }

    pub fn add_session(&self, token: impl Into<String>, user: UserId) {
        self.inner.lock().sessions.insert(token.into(), user);
    }

    pub fn add_role(&self, role: Role) {
        self.inner.lock().roles.push(role);
    }

    pub fn add_model(&self, model: ModelConfig) {
        self.inner
            .lock()
            .models
            .insert(model.model_id.clone(), model);
    }

    pub fn equip_mind_block(&self, user: UserId, role_id: impl Into<String>, block: MindBlock) {
        self.inner.lock().equips.push((user, role_id.into(), block));
    }

    pub fn add_message(&self, message: MessageRecord) {
        self.inner.lock().messages.push(message);
    }

    pub fn set_balance(&self, balance: FoodBalance) {
        self.inner
            .lock()
            .balances
            .insert(balance.user_id.clone(), balance);
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.inner.lock().messages.clone()
    }

    pub fn transactions(&self) -> Vec<FoodTransaction> {
        self.inner.lock().transactions.clone()
    }

    pub fn costs(&self) -> Vec<MessageCost> {
        self.inner.lock().costs.clone()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn user_for_session(&self, token: &str) -> Result<Option<UserId>, StorageError> {
        Ok(self.inner.lock().sessions.get(token).cloned())
    }

    async fn role_by_id(&self, id: &str) -> Result<Option<Role>, StorageError> {
        Ok(self
            .inner
            .lock()
            .roles
            .iter()
            .find(|role| role.id.0 == id)
            .cloned())
    }

    async fn role_by_slug(&self, slug: &str) -> Result<Option<Role>, StorageError> {
        Ok(self
            .inner
            .lock()
            .roles
            .iter()
            .find(|role| role.slug == slug)
            .cloned())
    }

    async fn models_by_ids(&self, ids: &[String]) -> Result<Vec<ModelConfig>, StorageError> {
        let guard = self.inner.lock();
        Ok(ids
            .iter()
            .filter_map(|id| guard.models.get(id).cloned())
            .collect())
    }

    async fn equipped_mind_blocks(
        &self,
        user: &UserId,
        role_id: &str,
    ) -> Result<Vec<MindBlock>, StorageError> {
        Ok(self
            .inner
            .lock()
            .equips
            .iter()
            .filter(|(equip_user, equip_role, _)| equip_user == user && equip_role == role_id)
            .map(|(_, _, block)| block.clone())
            .collect())
    }

    async fn recent_messages(
        &self,
        room: &RoomId,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        let guard = self.inner.lock();
        let mut recent: Vec<_> = guard
            .messages
            .iter()
            .filter(|message| &message.room_id == room)
            .cloned()
            .collect();
        recent.sort_by_key(|message| std::cmp::Reverse(message.created_at));
        recent.truncate(limit);
        Ok(recent)
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StorageError> {
        let mut guard = self.inner.lock();
        if guard.messages.iter().any(|m| m.id == message.id) {
            return Err(StorageError::bad_request("message id already exists"));
        }
        guard.messages.push(message.clone());
        Ok(())
    }

    async fn balance(&self, user: &UserId) -> Result<Option<FoodBalance>, StorageError> {
        Ok(self.inner.lock().balances.get(user).cloned())
    }

    async fn debit_if_sufficient(
        &self,
        user: &UserId,
        amount: i64,
    ) -> Result<DebitOutcome, StorageError> {
        if !self.caps().atomic_debit {
            return Err(StorageError::bad_request(
                "conditional debit unsupported by this backend",
            ));
        }
        let mut guard = self.inner.lock();
        let balance = guard.balances.entry(user.clone()).or_insert(FoodBalance {
            user_id: user.clone(),
            current_balance: 0,
            total_spent: 0,
        });
        if balance.current_balance < amount {
            return Ok(DebitOutcome::Insufficient);
        }
        balance.current_balance -= amount;
        balance.total_spent += amount;
        Ok(DebitOutcome::Applied(balance.clone()))
    }

    async fn debit_unchecked(
        &self,
        user: &UserId,
        amount: i64,
    ) -> Result<FoodBalance, StorageError> {
        let mut guard = self.inner.lock();
        let balance = guard.balances.entry(user.clone()).or_insert(FoodBalance {
            user_id: user.clone(),
            current_balance: 0,
            total_spent: 0,
        });
        balance.current_balance -= amount;
        balance.total_spent += amount;
        Ok(balance.clone())
    }

    async fn insert_transaction(&self, tx: &FoodTransaction) -> Result<(), StorageError> {
        self.inner.lock().transactions.push(tx.clone());
        Ok(())
    }

    async fn insert_cost(&self, cost: &MessageCost) -> Result<(), StorageError> {
        self.inner.lock().costs.push(cost.clone());
        Ok(())
    }

    fn caps(&self) -> StoreCaps {
        StoreCaps {
            atomic_debit: self.atomic_debit.load(std::sync::atomic::Ordering::Relaxed),
        }
    }
}

/// In-memory object store; "public URL" is a memory:// pseudo scheme.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<HashMap<String, (Vec<u8>, String)>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(path).map(|(bytes, _)| bytes.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_public(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.objects
            .lock()
            .insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(format!("memory://objects/{path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tavern_types::prelude::Id;

    fn user() -> UserId {
        UserId("user-1".into())
    }

    #[tokio::test]
    async fn debit_if_sufficient_applies_and_tracks_spend() {
        let store = MemoryStore::new();
        store.set_balance(FoodBalance {
            user_id: user(),
            current_balance: 10,
            total_spent: 3,
        });

        let outcome = store.debit_if_sufficient(&user(), 4).await.unwrap();
        match outcome {
            DebitOutcome::Applied(balance) => {
                assert_eq!(balance.current_balance, 6);
                assert_eq!(balance.total_spent, 7);
            }
            DebitOutcome::Insufficient => panic!("debit should apply"),
        }
    }

    #[tokio::test]
    async fn debit_if_sufficient_rejects_overdraft() {
        let store = MemoryStore::new();
        store.set_balance(FoodBalance {
            user_id: user(),
            current_balance: 3,
            total_spent: 0,
        });

        let outcome = store.debit_if_sufficient(&user(), 4).await.unwrap();
        assert_eq!(outcome, DebitOutcome::Insufficient);
        let balance = store.balance(&user()).await.unwrap().unwrap();
        assert_eq!(balance.current_balance, 3);
    }

    #[tokio::test]
    async fn missing_balance_row_reads_as_none() {
        let store = MemoryStore::new();
        assert!(store.balance(&user()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_messages_returns_newest_first_with_limit() {
        let store = MemoryStore::new();
        let room = RoomId("room-1".into());
        for i in 0..15 {
            store.add_message(MessageRecord {
                id: Id(format!("msg-{i}")),
                room_id: room.clone(),
                user_id: user(),
                sender_type: crate::model::SenderType::User,
                content: format!("turn {i}"),
                model_used: None,
                content_json: None,
                created_at: i,
            });
        }

        let recent = store.recent_messages(&room, 10).await.unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].content, "turn 14");
        assert_eq!(recent[9].content, "turn 5");
    }

    #[tokio::test]
    async fn equip_order_is_insertion_order() {
        let store = MemoryStore::new();
        for title in ["first", "second", "third"] {
            store.equip_mind_block(
                user(),
                "role-1",
                MindBlock {
                    id: Id(format!("block-{title}")),
                    title: title.into(),
                    content_json: serde_json::json!({}),
                    compiled_prompt: None,
                },
            );
        }

        let blocks = store.equipped_mind_blocks(&user(), "role-1").await.unwrap();
        let titles: Vec<_> = blocks.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn object_store_round_trip() {
        let objects = MemoryObjectStore::new();
        let url = objects
            .put_public("u1/c1/123.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();
        assert_eq!(url, "memory://objects/u1/c1/123.png");
        assert_eq!(objects.get("u1/c1/123.png").unwrap(), vec![1, 2, 3]);
    }
}
