//! Chat-completions wire shape. Used natively by OpenAI-compatible vendors
//! and as the carrier for every call rerouted through the meta-provider.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::chat::{ChatMessage, Completion, ContentPart, Role, Usage};
use crate::errors::LlmError;
use crate::provider::CallPlan;

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<OutboundMessage>,
}

#[derive(Serialize)]
struct OutboundMessage {
    role: &'static str,
    content: OutboundContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum OutboundContent {
    Text(String),
    Parts(Vec<OutboundPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlRef },
}

#[derive(Serialize)]
struct ImageUrlRef {
    url: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    usage: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: InboundMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct InboundMessage {
    #[serde(default)]
    content: Option<InboundContent>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InboundContent {
    Text(String),
    Parts(Vec<InboundPart>),
}

#[derive(Deserialize)]
struct InboundPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct UsagePayload {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}

pub(crate) async fn complete(
    client: &Client,
    plan: &CallPlan,
    messages: &[ChatMessage],
) -> Result<Completion, LlmError> {
    let payload = ChatCompletionRequest {
        model: &plan.model,
        messages: messages.iter().map(to_outbound_message).collect(),
    };

    let url = format!("{}/chat/completions", plan.base_url);
    let response = client
        .post(&url)
        .bearer_auth(&plan.api_key)
        .json(&payload)
        .send()
        .await
        .map_err(|err| LlmError::provider_unavailable(&format!("chat request error: {err}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unavailable>".into());
        return Err(map_http_error(status, &body));
    }

    let payload = response
        .json::<ChatCompletionResponse>()
        .await
        .map_err(|err| LlmError::provider_unavailable(&format!("chat response decode: {err}")))?;

    build_completion(plan, payload)
}

fn to_outbound_message(message: &ChatMessage) -> OutboundMessage {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };

    let content = if message.has_images() {
        OutboundContent::Parts(
            message
                .parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => OutboundPart::Text { text: text.clone() },
                    ContentPart::ImageUrl { url } => OutboundPart::ImageUrl {
                        image_url: ImageUrlRef { url: url.clone() },
                    },
                })
                .collect(),
        )
    } else {
        OutboundContent::Text(message.joined_text())
    };

    OutboundMessage { role, content }
}

fn build_completion(
    plan: &CallPlan,
    mut response: ChatCompletionResponse,
) -> Result<Completion, LlmError> {
    if response.choices.is_empty() {
        return Err(LlmError::provider_unavailable("provider returned no choices"));
    }
    let choice = response.choices.remove(0);

    let content = match choice.message.content {
        Some(InboundContent::Text(text)) => text,
        Some(InboundContent::Parts(parts)) => parts
            .into_iter()
            .filter(|part| part.kind == "text")
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join(""),
        None => String::new(),
    };

    let usage = response
        .usage
        .map(|u| Usage {
            input_tokens: u.prompt_tokens.unwrap_or_default(),
            output_tokens: u.completion_tokens.unwrap_or_default(),
            total_tokens: u.total_tokens.unwrap_or_default(),
        })
        .unwrap_or_default();

    let provider_meta = json!({
        "wire": "openai",
        "via_openrouter": plan.via_openrouter,
        "response_id": response.id,
        "response_model": response.model,
        "finish_reason": choice.finish_reason,
    });

    Ok(Completion {
        content,
        usage,
        provider_meta,
    })
}

fn map_http_error(status: StatusCode, body: &str) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LlmError::provider_unavailable(&format!("provider auth failed: {body}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            LlmError::provider_unavailable(&format!("provider rate limited request: {body}"))
        }
        StatusCode::BAD_REQUEST => LlmError::schema(&format!("provider rejected request: {body}")),
        _ => LlmError::provider_unavailable(&format!(
            "provider returned {}: {}",
            status.as_u16(),
            body
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::WireFamily;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn plan(server: &MockServer) -> CallPlan {
        CallPlan {
            family: WireFamily::OpenAi,
            base_url: server.uri(),
            api_key: "test-key".into(),
            model: "gpt-4o-mini".into(),
            via_openrouter: false,
        }
    }

    fn sample_response() -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "finish_reason": "stop",
                "message": { "role": "assistant", "content": "hello there" }
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 6, "total_tokens": 18 }
        })
    }

    #[tokio::test]
    async fn chat_happy_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_response()))
            .mount(&server)
            .await;

        let client = Client::new();
        let messages = vec![
            ChatMessage::text(Role::System, "You are helpful."),
            ChatMessage::text(Role::User, "Say hi"),
        ];
        let completion = complete(&client, &plan(&server), &messages).await.unwrap();

        assert_eq!(completion.content, "hello there");
        assert_eq!(completion.usage.input_tokens, 12);
        assert_eq!(completion.usage.output_tokens, 6);
        assert_eq!(completion.provider_meta["wire"], "openai");
    }

    #[tokio::test]
    async fn image_parts_switch_content_to_part_array() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "text", "text": "what is this?"},
                        {"type": "image_url", "image_url": {"url": "https://img.example/cat.png"}}
                    ]
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_response()))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new();
        let messages = vec![ChatMessage {
            role: Role::User,
            parts: vec![
                ContentPart::Text {
                    text: "what is this?".into(),
                },
                ContentPart::ImageUrl {
                    url: "https://img.example/cat.png".into(),
                },
            ],
        }];
        complete(&client, &plan(&server), &messages).await.unwrap();
    }

    #[tokio::test]
    async fn part_array_replies_are_flattened() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": [
                            {"type": "text", "text": "hello "},
                            {"type": "text", "text": "there"}
                        ]
                    }
                }]
            })))
            .mount(&server)
            .await;

        let client = Client::new();
        let messages = vec![ChatMessage::text(Role::User, "hi")];
        let completion = complete(&client, &plan(&server), &messages).await.unwrap();
        assert_eq!(completion.content, "hello there");
    }

    #[tokio::test]
    async fn upstream_errors_map_to_llm_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client = Client::new();
        let messages = vec![ChatMessage::text(Role::User, "hi")];
        let err = complete(&client, &plan(&server), &messages)
            .await
            .expect_err("rate limit");
        assert!(err.to_string().contains("rate limited"));
    }
}
