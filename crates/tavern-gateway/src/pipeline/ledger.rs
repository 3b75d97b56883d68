//! Persist the assistant turn, then bill it. Billing runs after the
//! message is durable; a billing failure is logged and never retracts the
//! already-finalized response.

use serde_json::{json, Value};
use tavern_storage::prelude::{
    DebitOutcome, FoodTransaction, MessageCost, MessageRecord, Role as Persona, SenderType,
};
use tavern_types::prelude::{now_ms, Id, RoomId, UserId};
use tracing::{error, info, warn};

use crate::errors::GatewayError;
use crate::pipeline::food;
use crate::pipeline::orchestrate::Aggregate;
use crate::state::AppState;

pub struct Settlement {
    pub record: MessageRecord,
    pub content_json: Value,
}

pub async fn settle(
    state: &AppState,
    user: &UserId,
    room: &RoomId,
    persona: &Persona,
    aggregate: &Aggregate,
    estimated_input_food: i64,
    mind_block_titles: &[String],
) -> Result<Settlement, GatewayError> {
    let output_food = food::food_estimate(&aggregate.content);
    let total_food = estimated_input_food + output_food;

    let content_json = observability_blob(
        aggregate,
        estimated_input_food,
        output_food,
        total_food,
        mind_block_titles,
    );

    let record = MessageRecord {
        id: Id::new_random(),
        room_id: room.clone(),
        user_id: user.clone(),
        sender_type: SenderType::Role,
        content: aggregate.content.clone(),
        model_used: Some(aggregate.model_used.clone()),
        content_json: Some(content_json.clone()),
        created_at: now_ms().0,
    };
    state.store.insert_message(&record).await?;

    if let Err(err) = bill(state, user, persona, &record, aggregate, total_food).await {
        error!(user = %user, message = %record.id, error = %err, "billing failed after persistence");
    }

    Ok(Settlement {
        record,
        content_json,
    })
}

fn observability_blob(
    aggregate: &Aggregate,
    input_food: i64,
    output_food: i64,
    total_food: i64,
    mind_block_titles: &[String],
) -> Value {
    let models: Vec<Value> = aggregate
        .sections
        .iter()
        .map(|section| {
            json!({
                "model_id": section.model_id,
                "display_name": section.display_name,
                "status": if section.content.is_some() { "ok" } else { "error" },
                "error": section.error,
                "usage": {
                    "input_tokens": section.usage.input_tokens,
                    "output_tokens": section.usage.output_tokens,
                    "total_tokens": section.usage.total_tokens,
                },
            })
        })
        .collect();

    json!({
        "models": models,
        "food": {
            "input": input_food,
            "output": output_food,
            "total": total_food,
        },
        "mind_blocks": mind_block_titles,
        "image_url": aggregate.image_url,
    })
}

async fn bill(
    state: &AppState,
    user: &UserId,
    persona: &Persona,
    record: &MessageRecord,
    aggregate: &Aggregate,
    total_food: i64,
) -> Result<(), GatewayError> {
    let store = state.store.as_ref();

    let balance_after = if store.caps().atomic_debit {
        match store.debit_if_sufficient(user, total_food).await? {
            DebitOutcome::Applied(balance) => balance.current_balance,
            DebitOutcome::Insufficient => {
                // Balance dropped between the pre-flight check and billing,
                // likely an overlapping request from the same user.
                warn!(user = %user, total_food, "conditional debit matched zero rows, turn left unbilled");
                return Ok(());
            }
        }
    } else {
        // Read-then-write window; only reachable on backends without a
        // conditional update.
        warn!(user = %user, "backend lacks atomic debit, falling back to unchecked decrement");
        store.debit_unchecked(user, total_food).await?.current_balance
    };

    let now = now_ms().0;
    store
        .insert_transaction(&FoodTransaction {
            id: Id::new_random(),
            user_id: user.clone(),
            amount: total_food,
            balance_after,
            message_id: record.id.clone(),
            description: format!("Chat with {}", persona.slug),
            created_at: now,
        })
        .await?;

    store
        .insert_cost(&MessageCost {
            id: Id::new_random(),
            message_id: record.id.clone(),
            model_name: aggregate.model_used.clone(),
            input_tokens: aggregate.usage.input_tokens,
            output_tokens: aggregate.usage.output_tokens,
            food_amount: total_food,
            created_at: now,
        })
        .await?;

    info!(user = %user, total_food, balance_after, "turn billed");
    Ok(())
}
