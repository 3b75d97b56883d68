//! Image generation over the same credential planning as chat. Two outbound
//! shapes: the dedicated generations endpoint for native image models, and
//! chat-completions with an image modality for everything rerouted or hybrid.

use base64::Engine;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;

use crate::errors::LlmError;
use crate::provider::{plan_call, CallPlan, CredentialStore, ModelTarget};

const IMAGE_MODEL_MARKERS: &[&str] = &[
    "dall-e",
    "dalle",
    "gpt-image",
    "flux",
    "stable-diffusion",
    "sdxl",
    "imagen",
];

const IMAGE_INTENT_MARKERS: &[&str] =
    &["draw", "paint", "sketch", "picture", "image", "illustrat"];

/// Model identifiers that denote an image generator rather than a chat model.
pub fn is_image_model(model_id: &str) -> bool {
    let lowered = model_id.to_ascii_lowercase();
    IMAGE_MODEL_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Keyword heuristic over the user's message text.
pub fn wants_image(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    IMAGE_INTENT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// What the provider handed back. Base64 payloads are promoted to object
/// storage by the caller; this crate never touches storage.
#[derive(Clone, Debug, PartialEq)]
pub enum ImageOutput {
    Url(String),
    Base64 { data: String, mime: String },
}

impl ImageOutput {
    /// Decoded bytes for the base64 variant.
    pub fn decode_base64(&self) -> Result<Vec<u8>, LlmError> {
        match self {
            ImageOutput::Base64 { data, .. } => base64::engine::general_purpose::STANDARD
                .decode(data.as_bytes())
                .map_err(|err| LlmError::schema(&format!("image payload is not base64: {err}"))),
            ImageOutput::Url(url) => Err(LlmError::schema(&format!(
                "image output is a URL, not base64: {url}"
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GeneratedImage {
    pub output: ImageOutput,
    pub provider_meta: Value,
}

#[derive(Deserialize)]
struct GenerationsResponse {
    #[serde(default)]
    data: Vec<GenerationsDatum>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct GenerationsDatum {
    url: Option<String>,
    b64_json: Option<String>,
}

pub struct ImageGenerator {
    client: Client,
    creds: CredentialStore,
}

impl ImageGenerator {
    pub fn new(creds: CredentialStore, request_timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| LlmError::unknown(&format!("image client build failed: {err}")))?;
        Ok(Self { client, creds })
    }

    pub async fn generate(
        &self,
        target: &ModelTarget,
        prompt: &str,
    ) -> Result<GeneratedImage, LlmError> {
        let plan = plan_call(target, &self.creds)?;
        if uses_generations_endpoint(&plan) {
            self.generate_native(&plan, prompt).await
        } else {
            self.generate_via_chat(&plan, prompt).await
        }
    }

    /// `POST {base}/images/generations`, the original image API shape.
    async fn generate_native(
        &self,
        plan: &CallPlan,
        prompt: &str,
    ) -> Result<GeneratedImage, LlmError> {
        let url = format!("{}/images/generations", plan.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&plan.api_key)
            .json(&json!({
                "model": plan.model,
                "prompt": prompt,
                "n": 1,
                "size": "1024x1024",
            }))
            .send()
            .await
            .map_err(|err| {
                LlmError::provider_unavailable(&format!("image request error: {err}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unavailable>".into());
            return Err(map_http_error(status, &body));
        }

        let payload = response
            .json::<GenerationsResponse>()
            .await
            .map_err(|err| {
                LlmError::provider_unavailable(&format!("image response decode: {err}"))
            })?;

        let datum = payload
            .data
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::provider_unavailable("image response carried no data"))?;

        let output = if let Some(url) = datum.url {
            classify_image_url(&url)?
        } else if let Some(b64) = datum.b64_json {
            ImageOutput::Base64 {
                data: b64,
                mime: "image/png".into(),
            }
        } else {
            return Err(LlmError::provider_unavailable(
                "image response had neither url nor b64_json",
            ));
        };

        Ok(GeneratedImage {
            output,
            provider_meta: json!({"wire": "images_generations", "via_openrouter": plan.via_openrouter}),
        })
    }

    /// Chat-completions with the image modality. Rerouted models speak this
    /// shape regardless of their native API.
    async fn generate_via_chat(
        &self,
        plan: &CallPlan,
        prompt: &str,
    ) -> Result<GeneratedImage, LlmError> {
        let url = format!("{}/chat/completions", plan.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&plan.api_key)
            .json(&json!({
                "model": plan.model,
                "messages": [{"role": "user", "content": prompt}],
                "modalities": ["image", "text"],
            }))
            .send()
            .await
            .map_err(|err| {
                LlmError::provider_unavailable(&format!("image request error: {err}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unavailable>".into());
            return Err(map_http_error(status, &body));
        }

        let payload = response.json::<Value>().await.map_err(|err| {
            LlmError::provider_unavailable(&format!("image response decode: {err}"))
        })?;

        let url = extract_chat_image_url(&payload).ok_or_else(|| {
            LlmError::provider_unavailable("chat response carried no image payload")
        })?;

        Ok(GeneratedImage {
            output: classify_image_url(&url)?,
            provider_meta: json!({"wire": "chat_modalities", "via_openrouter": plan.via_openrouter}),
        })
    }
}

fn uses_generations_endpoint(plan: &CallPlan) -> bool {
    if plan.via_openrouter {
        return false;
    }
    let lowered = plan.model.to_ascii_lowercase();
    lowered.contains("dall-e") || lowered.contains("dalle") || lowered.contains("gpt-image")
}

/// Image location from a chat-shaped reply, in order of preference: the
/// structured `images` array, then a markdown image token, then a bare
/// data URL as the entire content.
fn extract_chat_image_url(payload: &Value) -> Option<String> {
    let message = payload.get("choices")?.get(0)?.get("message")?;

    if let Some(url) = message
        .get("images")
        .and_then(|images| images.get(0))
        .and_then(|image| image.get("image_url"))
        .and_then(|image_url| image_url.get("url"))
        .and_then(Value::as_str)
    {
        return Some(url.to_string());
    }

    let content = message.get("content").and_then(Value::as_str)?;
    if let Some(captures) = markdown_image_re().captures(content) {
        return Some(captures[1].to_string());
    }

    let trimmed = content.trim();
    if trimmed.starts_with("data:image/") {
        return Some(trimmed.to_string());
    }
    None
}

fn markdown_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[[^\]]*\]\(([^)\s]+)\)").unwrap())
}

fn classify_image_url(raw: &str) -> Result<ImageOutput, LlmError> {
    if let Some(rest) = raw.strip_prefix("data:") {
        let (mime, data) = rest.split_once(";base64,").ok_or_else(|| {
            LlmError::schema("image data URL is not base64 encoded")
        })?;
        return Ok(ImageOutput::Base64 {
            data: data.to_string(),
            mime: mime.to_string(),
        });
    }
    url::Url::parse(raw)
        .map_err(|err| LlmError::schema(&format!("image URL is invalid: {err}")))?;
    Ok(ImageOutput::Url(raw.to_string()))
}

fn map_http_error(status: StatusCode, body: &str) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LlmError::provider_unavailable(&format!("image provider auth failed: {body}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            LlmError::provider_unavailable(&format!("image provider rate limited request: {body}"))
        }
        StatusCode::BAD_REQUEST => {
            LlmError::schema(&format!("image provider rejected request: {body}"))
        }
        _ => LlmError::provider_unavailable(&format!(
            "image provider returned {}: {}",
            status.as_u16(),
            body
        )),
    }
}
