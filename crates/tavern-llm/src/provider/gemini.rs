//! Google Generative Language REST shape: `contents` with the assistant
//! role remapped to `model`, system prompt as a separate top-level field.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::chat::{ChatMessage, Completion, ContentPart, Role, Usage};
use crate::errors::LlmError;
use crate::provider::CallPlan;

const API_VERSION: &str = "v1beta";

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

pub(crate) async fn complete(
    client: &Client,
    plan: &CallPlan,
    messages: &[ChatMessage],
) -> Result<Completion, LlmError> {
    let payload = build_request(messages)?;
    let url = format!(
        "{}/{}/models/{}:generateContent",
        plan.base_url.trim_end_matches('/'),
        API_VERSION,
        plan.model
    );

    let response = client
        .post(&url)
        .query(&[("key", plan.api_key.as_str())])
        .json(&payload)
        .send()
        .await
        .map_err(|err| LlmError::provider_unavailable(&format!("gemini request error: {err}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unavailable>".into());
        return Err(map_http_error(status, &body));
    }

    let payload = response
        .json::<GenerateContentResponse>()
        .await
        .map_err(|err| LlmError::provider_unavailable(&format!("gemini response decode: {err}")))?;

    build_completion(payload)
}

fn build_request(messages: &[ChatMessage]) -> Result<GenerateContentRequest, LlmError> {
    let mut system_segments = Vec::<String>::new();
    let mut contents = Vec::<Content>::new();

    for message in messages {
        match message.role {
            Role::System => {
                let text = message.joined_text();
                if !text.is_empty() {
                    system_segments.push(text);
                }
            }
            Role::User => contents.push(Content {
                role: "user".into(),
                parts: build_parts(message),
            }),
            Role::Assistant => contents.push(Content {
                role: "model".into(),
                parts: build_parts(message),
            }),
        }
    }

    if contents.is_empty() {
        return Err(LlmError::schema(
            "gemini request requires at least one content message",
        ));
    }

    let system_instruction = if system_segments.is_empty() {
        None
    } else {
        Some(Content {
            role: "system".into(),
            parts: system_segments
                .into_iter()
                .map(|text| Part {
                    text: Some(text),
                    ..Part::default()
                })
                .collect(),
        })
    };

    Ok(GenerateContentRequest {
        contents,
        system_instruction,
    })
}

/// Non-text parts are best-effort: data URLs become inline data, anything
/// else degrades to a textual reference.
fn build_parts(message: &ChatMessage) -> Vec<Part> {
    let mut parts = Vec::new();
    for part in &message.parts {
        match part {
            ContentPart::Text { text } => parts.push(Part {
                text: Some(text.clone()),
                ..Part::default()
            }),
            ContentPart::ImageUrl { url } => match parse_data_url(url) {
                Some((mime_type, data)) => parts.push(Part {
                    inline_data: Some(InlineData { mime_type, data }),
                    ..Part::default()
                }),
                None => parts.push(Part {
                    text: Some(format!("[image] {url}")),
                    ..Part::default()
                }),
            },
        }
    }
    if parts.is_empty() {
        parts.push(Part {
            text: Some(String::new()),
            ..Part::default()
        });
    }
    parts
}

fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (mime, data) = rest.split_once(";base64,")?;
    Some((mime.to_string(), data.to_string()))
}

fn build_completion(payload: GenerateContentResponse) -> Result<Completion, LlmError> {
    // The first candidate is the primary one.
    let candidate = payload
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::provider_unavailable("gemini returned no candidates"))?;

    let content = candidate
        .content
        .ok_or_else(|| LlmError::provider_unavailable("gemini candidate missing content"))?;

    let text: String = content
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join("");

    let usage = payload
        .usage_metadata
        .map(|usage| Usage {
            input_tokens: usage.prompt_token_count.unwrap_or_default(),
            output_tokens: usage.candidates_token_count.unwrap_or_default(),
            total_tokens: usage.total_token_count.unwrap_or_default(),
        })
        .unwrap_or_default();

    let provider_meta = json!({
        "wire": "gemini",
        "finish_reason": candidate.finish_reason,
    });

    Ok(Completion {
        content: text,
        usage,
        provider_meta,
    })
}

fn map_http_error(status: StatusCode, body: &str) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LlmError::provider_unavailable(&format!("gemini auth failed: {body}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            LlmError::provider_unavailable(&format!("gemini rate limited request: {body}"))
        }
        StatusCode::BAD_REQUEST => LlmError::schema(&format!("gemini rejected request: {body}")),
        _ => LlmError::provider_unavailable(&format!(
            "gemini returned {}: {}",
            status.as_u16(),
            body
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::WireFamily;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn plan(server: &MockServer) -> CallPlan {
        CallPlan {
            family: WireFamily::Google,
            base_url: server.uri(),
            api_key: "g-key".into(),
            model: "gemini-2.0-flash".into(),
            via_openrouter: false,
        }
    }

    #[tokio::test]
    async fn system_prompt_travels_as_top_level_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(query_param("key", "g-key"))
            .and(body_partial_json(json!({
                "systemInstruction": {"role": "system", "parts": [{"text": "You are Mori."}]},
                "contents": [{"role": "user", "parts": [{"text": "hello"}]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "Hi!"}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new();
        let messages = vec![
            ChatMessage::text(Role::System, "You are Mori."),
            ChatMessage::text(Role::User, "hello"),
        ];
        let completion = complete(&client, &plan(&server), &messages).await.unwrap();
        assert_eq!(completion.content, "Hi!");
        assert_eq!(completion.usage.input_tokens, 4);
    }

    #[tokio::test]
    async fn assistant_history_is_remapped_to_model_role() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(body_partial_json(json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "hi"}]},
                    {"role": "model", "parts": [{"text": "hello"}]},
                    {"role": "user", "parts": [{"text": "again"}]}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "ok"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new();
        let messages = vec![
            ChatMessage::text(Role::User, "hi"),
            ChatMessage::text(Role::Assistant, "hello"),
            ChatMessage::text(Role::User, "again"),
        ];
        complete(&client, &plan(&server), &messages).await.unwrap();
    }

    #[test]
    fn the_first_candidate_is_the_primary_one() {
        let payload = GenerateContentResponse {
            candidates: vec![
                Candidate {
                    content: Some(CandidateContent {
                        parts: vec![CandidatePart {
                            text: Some("primary".into()),
                        }],
                    }),
                    finish_reason: Some("STOP".into()),
                },
                Candidate {
                    content: Some(CandidateContent {
                        parts: vec![CandidatePart {
                            text: Some("alternate".into()),
                        }],
                    }),
                    finish_reason: None,
                },
            ],
            usage_metadata: None,
        };
        let completion = build_completion(payload).unwrap();
        assert_eq!(completion.content, "primary");
    }

    #[test]
    fn data_urls_become_inline_data() {
        let message = ChatMessage {
            role: Role::User,
            parts: vec![ContentPart::ImageUrl {
                url: "data:image/png;base64,AAAA".into(),
            }],
        };
        let parts = build_parts(&message);
        let inline = parts[0].inline_data.as_ref().expect("inline data");
        assert_eq!(inline.mime_type, "image/png");
        assert_eq!(inline.data, "AAAA");
    }

    #[test]
    fn remote_urls_degrade_to_text_references() {
        let message = ChatMessage {
            role: Role::User,
            parts: vec![ContentPart::ImageUrl {
                url: "https://img.example/cat.png".into(),
            }],
        };
        let parts = build_parts(&message);
        assert_eq!(
            parts[0].text.as_deref(),
            Some("[image] https://img.example/cat.png")
        );
    }
}
