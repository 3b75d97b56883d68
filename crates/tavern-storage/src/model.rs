use serde::{Deserialize, Serialize};
use tavern_types::prelude::{Id, RoomId, UserId};

/// Persona configuration. One row per companion, read-only at request time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Role {
    pub id: Id,
    pub slug: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Comma-separated list of default model ids.
    pub default_model: String,
}

/// One row per invocable model. `provider` selects the wire family.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub model_id: String,
    pub provider: String,
    pub model_name: String,
    pub display_name: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Reusable prompt fragment equipped onto a (user, role) pair.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MindBlock {
    pub id: Id,
    pub title: String,
    #[serde(default)]
    pub content_json: serde_json::Value,
    #[serde(default)]
    pub compiled_prompt: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    User,
    Role,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub id: Id,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub sender_type: SenderType,
    pub content: String,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub content_json: Option<serde_json::Value>,
    pub created_at: i64,
}

/// One row per user; mutated exactly once per completed assistant turn.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FoodBalance {
    pub user_id: UserId,
    pub current_balance: i64,
    pub total_spent: i64,
}

/// Append-only audit row, one per billed turn.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FoodTransaction {
    pub id: Id,
    pub user_id: UserId,
    pub amount: i64,
    pub balance_after: i64,
    pub message_id: Id,
    pub description: String,
    pub created_at: i64,
}

/// Append-only, one per billed turn. Token counts are provider-reported and
/// observational only; `food_amount` is the billed unit.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MessageCost {
    pub id: Id,
    pub message_id: Id,
    pub model_name: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub food_amount: i64,
    pub created_at: i64,
}
