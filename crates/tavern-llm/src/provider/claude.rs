//! Anthropic Messages wire shape. System prompt is a top-level string,
//! `max_tokens` is mandatory, auth is `x-api-key` plus a version header.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::chat::{ChatMessage, Completion, ContentPart, Role, Usage};
use crate::errors::LlmError;
use crate::provider::CallPlan;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<OutboundMessage>,
}

#[derive(Serialize)]
struct OutboundMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ImageSource {
    Url {
        url: String,
    },
    Base64 {
        media_type: String,
        data: String,
    },
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    content: Vec<InboundBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct InboundBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct UsagePayload {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
}

pub(crate) async fn complete(
    client: &Client,
    plan: &CallPlan,
    messages: &[ChatMessage],
) -> Result<Completion, LlmError> {
    let payload = build_request(plan, messages)?;
    let url = format!("{}/v1/messages", plan.base_url.trim_end_matches('/'));

    let response = client
        .post(&url)
        .header("x-api-key", &plan.api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&payload)
        .send()
        .await
        .map_err(|err| LlmError::provider_unavailable(&format!("claude request error: {err}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unavailable>".into());
        return Err(map_http_error(status, &body));
    }

    let payload = response
        .json::<MessagesResponse>()
        .await
        .map_err(|err| LlmError::provider_unavailable(&format!("claude response decode: {err}")))?;

    Ok(build_completion(payload))
}

fn build_request(plan: &CallPlan, messages: &[ChatMessage]) -> Result<MessagesRequest, LlmError> {
    let mut system_segments = Vec::<String>::new();
    let mut outbound = Vec::<OutboundMessage>::new();

    for message in messages {
        match message.role {
            Role::System => {
                let text = message.joined_text();
                if !text.is_empty() {
                    system_segments.push(text);
                }
            }
            Role::User => outbound.push(OutboundMessage {
                role: "user",
                content: build_blocks(message),
            }),
            Role::Assistant => outbound.push(OutboundMessage {
                role: "assistant",
                content: build_blocks(message),
            }),
        }
    }

    if outbound.is_empty() {
        return Err(LlmError::schema(
            "claude request requires at least one non-system message",
        ));
    }

    let system = if system_segments.is_empty() {
        None
    } else {
        Some(system_segments.join("\n\n"))
    };

    Ok(MessagesRequest {
        model: plan.model.clone(),
        max_tokens: DEFAULT_MAX_TOKENS,
        system,
        messages: outbound,
    })
}

fn build_blocks(message: &ChatMessage) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    for part in &message.parts {
        match part {
            ContentPart::Text { text } => blocks.push(ContentBlock::Text { text: text.clone() }),
            ContentPart::ImageUrl { url } => {
                let source = match parse_data_url(url) {
                    Some((media_type, data)) => ImageSource::Base64 { media_type, data },
                    None => ImageSource::Url { url: url.clone() },
                };
                blocks.push(ContentBlock::Image { source });
            }
        }
    }
    if blocks.is_empty() {
        blocks.push(ContentBlock::Text {
            text: String::new(),
        });
    }
    blocks
}

fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (mime, data) = rest.split_once(";base64,")?;
    Some((mime.to_string(), data.to_string()))
}

fn build_completion(payload: MessagesResponse) -> Completion {
    let content: String = payload
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");

    let usage = payload
        .usage
        .map(|usage| {
            let input = usage.input_tokens.unwrap_or_default();
            let output = usage.output_tokens.unwrap_or_default();
            Usage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
            }
        })
        .unwrap_or_default();

    let provider_meta = json!({
        "wire": "anthropic",
        "response_id": payload.id,
        "stop_reason": payload.stop_reason,
    });

    Completion {
        content,
        usage,
        provider_meta,
    }
}

fn map_http_error(status: StatusCode, body: &str) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LlmError::provider_unavailable(&format!("claude auth failed: {body}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            LlmError::provider_unavailable(&format!("claude rate limited request: {body}"))
        }
        StatusCode::BAD_REQUEST => LlmError::schema(&format!("claude rejected request: {body}")),
        _ => LlmError::provider_unavailable(&format!(
            "claude returned {}: {}",
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
            family: WireFamily::Anthropic,
            base_url: server.uri(),
            api_key: "a-key".into(),
            model: "claude-sonnet-4".into(),
            via_openrouter: false,
        }
    }

    #[tokio::test]
    async fn system_prompt_is_lifted_out_of_the_message_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "a-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({
                "model": "claude-sonnet-4",
                "system": "You are Sage.",
                "messages": [{
                    "role": "user",
                    "content": [{"type": "text", "text": "teach me"}]
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_1",
                "content": [{"type": "text", "text": "Gladly."}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 9, "output_tokens": 3}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new();
        let messages = vec![
            ChatMessage::text(Role::System, "You are Sage."),
            ChatMessage::text(Role::User, "teach me"),
        ];
        let completion = complete(&client, &plan(&server), &messages).await.unwrap();
        assert_eq!(completion.content, "Gladly.");
        assert_eq!(completion.usage.total_tokens, 12);
        assert_eq!(completion.provider_meta["wire"], "anthropic");
    }

    #[tokio::test]
    async fn image_urls_become_url_source_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(json!({
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "text", "text": "what is this?"},
                        {"type": "image", "source": {"type": "url", "url": "https://img.example/cat.png"}}
                    ]
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "a cat"}]
            })))
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

    #[test]
    fn data_urls_become_base64_source_blocks() {
        let message = ChatMessage {
            role: Role::User,
            parts: vec![ContentPart::ImageUrl {
                url: "data:image/jpeg;base64,QUJD".into(),
            }],
        };
        let blocks = build_blocks(&message);
        match &blocks[0] {
            ContentBlock::Image {
                source: ImageSource::Base64 { media_type, data },
            } => {
                assert_eq!(media_type, "image/jpeg");
                assert_eq!(data, "QUJD");
            }
            other => panic!("unexpected block: {}", serde_json::to_string(other).unwrap()),
        }
    }

    #[tokio::test]
    async fn bad_request_maps_to_schema_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid model"))
            .mount(&server)
            .await;

        let client = Client::new();
        let messages = vec![ChatMessage::text(Role::User, "hi")];
        let err = complete(&client, &plan(&server), &messages)
            .await
            .expect_err("bad request");
        assert!(err.to_string().contains("rejected"));
    }
}
