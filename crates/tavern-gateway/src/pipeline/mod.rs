//! The chat turn pipeline: role and model resolution, prompt composition,
//! history, attachments, balance guard, fan-out, settlement.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tavern_llm::prelude::{ChatMessage, Role as ChatRole};
use tavern_storage::prelude::{MessageRecord, SenderType};
use tavern_types::prelude::{now_ms, Id, RoomId, UserId};
use tracing::info;

use crate::errors::GatewayError;
use crate::state::AppState;

pub mod attachments;
pub mod food;
pub mod history;
pub mod ledger;
pub mod orchestrate;
pub mod prompt;
pub mod resolve;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnRequest {
    #[serde(default)]
    pub message: String,
    pub room_id: String,
    #[serde(default)]
    pub companion_id: Option<String>,
    /// Comma-separated override of the persona's default model list.
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Only honored for service-role calls.
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnResponse {
    pub success: bool,
    pub content: String,
    pub message_id: String,
    pub content_json: Value,
    pub model_used: String,
}

pub async fn run(
    state: &AppState,
    user: UserId,
    request: ChatTurnRequest,
) -> Result<ChatTurnResponse, GatewayError> {
    if request.message.trim().is_empty() && request.attachments.is_empty() {
        return Err(GatewayError::validation(
            "message is required when no attachments are present",
        ));
    }
    // A persona is mandatory; there is no "no companion" mode.
    let companion_id = request
        .companion_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| GatewayError::config_missing("no companion persona on this turn"))?;

    let store = state.store.as_ref();
    let room = RoomId(request.room_id.clone());

    let persona = resolve::resolve_role(store, companion_id).await?;
    let targets = resolve::resolve_models(store, request.model_id.as_deref(), &persona).await?;
    info!(
        persona = %persona.slug,
        models = targets.len(),
        room = %room,
        "chat turn resolved"
    );

    let blocks = store.equipped_mind_blocks(&user, &persona.id.0).await?;
    let system_prompt = prompt::compose(&persona, &blocks);
    let block_titles = prompt::block_titles(&blocks);

    let past = history::load(store, &room, state.history_limit).await?;
    let user_message = attachments::build_user_message(&request.message, &request.attachments);

    // Pre-flight guard; everything before this point is read-only.
    let estimated_input_food = food::estimated_input_food(&system_prompt, &request.message);
    let available = store
        .balance(&user)
        .await?
        .map(|balance| balance.current_balance)
        .unwrap_or(0);
    if available < estimated_input_food {
        return Err(GatewayError::insufficient_balance(
            estimated_input_food,
            available,
        ));
    }

    store
        .insert_message(&MessageRecord {
            id: Id::new_random(),
            room_id: room.clone(),
            user_id: user.clone(),
            sender_type: SenderType::User,
            content: request.message.clone(),
            model_used: None,
            content_json: None,
            created_at: now_ms().0,
        })
        .await?;

    let mut messages = Vec::with_capacity(past.len() + 2);
    messages.push(ChatMessage::text(ChatRole::System, system_prompt));
    messages.extend(past);
    messages.push(user_message);

    let generate_image = orchestrate::image_trigger(&persona, &request.message, &targets);
    let aggregate = orchestrate::run(
        state,
        &persona,
        &user,
        &targets,
        &messages,
        &request.message,
        generate_image,
    )
    .await?;

    let settlement = ledger::settle(
        state,
        &user,
        &room,
        &persona,
        &aggregate,
        estimated_input_food,
        &block_titles,
    )
    .await?;

    Ok(ChatTurnResponse {
        success: true,
        content: settlement.record.content,
        message_id: settlement.record.id.0,
        content_json: settlement.content_json,
        model_used: aggregate.model_used,
    })
}
