//! Provider dispatch: one `complete` contract over three wire families,
//! with credential-presence-driven rerouting through the meta-provider.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::chat::{ChatMessage, Completion};
use crate::errors::LlmError;

mod claude;
mod gemini;
mod openai;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// The per-model slice of configuration the gateway passes in. Mirrors the
/// model table row, minus storage concerns.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelTarget {
    pub model_id: String,
    pub provider: String,
    pub model_name: String,
    pub display_name: String,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireFamily {
    /// Chat-completions shape; covers OpenAI itself plus the long tail of
    /// vendors proxied through compatible endpoints.
    OpenAi,
    /// Google Generative Language REST.
    Google,
    /// Anthropic Messages.
    Anthropic,
}

impl WireFamily {
    pub fn of(provider: &str) -> Self {
        match provider.to_ascii_lowercase().as_str() {
            "google" | "gemini" => WireFamily::Google,
            "anthropic" | "claude" => WireFamily::Anthropic,
            _ => WireFamily::OpenAi,
        }
    }
}

/// Credentials snapshotted once at process start. No provider code reads
/// environment variables at call time.
#[derive(Clone, Debug, Default)]
pub struct CredentialStore {
    keys: HashMap<String, String>,
    fallback_key: Option<String>,
    openrouter_key: Option<String>,
}

impl CredentialStore {
    /// Snapshot every `*_API_KEY` variable plus the two well-known fallbacks.
    pub fn from_env() -> Self {
        let mut store = Self::default();
        for (name, value) in std::env::vars() {
            if value.is_empty() {
                continue;
            }
            if name.ends_with("_API_KEY") {
                store.keys.insert(name.clone(), value.clone());
            }
            match name.as_str() {
                "OPENROUTER_API_KEY" => store.openrouter_key = Some(value),
                "LLM_FALLBACK_API_KEY" => store.fallback_key = Some(value),
                _ => {}
            }
        }
        store
    }

    pub fn with_key(mut self, env_name: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys.insert(env_name.into(), key.into());
        self
    }

    pub fn with_fallback(mut self, key: impl Into<String>) -> Self {
        self.fallback_key = Some(key.into());
        self
    }

    pub fn with_openrouter(mut self, key: impl Into<String>) -> Self {
        self.openrouter_key = Some(key.into());
        self
    }

    fn vendor_key(&self, target: &ModelTarget) -> Option<&str> {
        target
            .api_key_env
            .as_deref()
            .and_then(|env_name| self.keys.get(env_name))
            .map(String::as_str)
    }

    fn fallback(&self) -> Option<&str> {
        self.fallback_key.as_deref()
    }

    fn openrouter(&self) -> Option<&str> {
        self.openrouter_key.as_deref()
    }
}

/// A fully resolved outbound call: wire family actually used, endpoint,
/// credential, and the model identifier in that endpoint's convention.
#[derive(Clone, Debug, PartialEq)]
pub struct CallPlan {
    pub family: WireFamily,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub via_openrouter: bool,
}

/// Credential precedence: vendor key -> generic fallback (OpenAI-compatible
/// family only) -> meta-provider reroute -> hard failure.
pub fn plan_call(target: &ModelTarget, creds: &CredentialStore) -> Result<CallPlan, LlmError> {
    let family = WireFamily::of(&target.provider);

    if let Some(key) = creds.vendor_key(target) {
        return Ok(CallPlan {
            family,
            base_url: native_base_url(family, target),
            api_key: key.to_string(),
            model: target.model_name.clone(),
            via_openrouter: false,
        });
    }

    if family == WireFamily::OpenAi {
        if let Some(key) = creds.fallback() {
            return Ok(CallPlan {
                family,
                base_url: native_base_url(family, target),
                api_key: key.to_string(),
                model: target.model_name.clone(),
                via_openrouter: false,
            });
        }
    }

    if let Some(key) = creds.openrouter() {
        // Reroute: the base URL and the outgoing model identifier both
        // switch to the meta-provider's conventions, and non-OpenAI wire
        // families are carried over the chat-completions shape.
        return Ok(CallPlan {
            family: WireFamily::OpenAi,
            base_url: OPENROUTER_BASE_URL.to_string(),
            api_key: key.to_string(),
            model: openrouter_model_id(&target.provider, &target.model_name),
            via_openrouter: true,
        });
    }

    Err(LlmError::no_credential(&format!(
        "no usable credential for model '{}' (provider '{}')",
        target.model_id, target.provider
    )))
}

fn native_base_url(family: WireFamily, target: &ModelTarget) -> String {
    if let Some(base) = target.base_url.as_deref() {
        return base.trim_end_matches('/').to_string();
    }
    match family {
        WireFamily::OpenAi => OPENAI_BASE_URL.to_string(),
        WireFamily::Google => GEMINI_BASE_URL.to_string(),
        WireFamily::Anthropic => ANTHROPIC_BASE_URL.to_string(),
    }
}

fn openrouter_model_id(provider: &str, model_name: &str) -> String {
    if model_name.contains('/') {
        model_name.to_string()
    } else {
        format!("{}/{}", provider.to_ascii_lowercase(), model_name)
    }
}

#[derive(Clone, Debug)]
pub struct ProviderGatewayConfig {
    pub request_timeout: Duration,
    pub max_concurrent_requests: usize,
}

impl Default for ProviderGatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            max_concurrent_requests: 8,
        }
    }
}

/// Uniform `complete(target, messages) -> Completion` over the wire
/// families. Holds one shared HTTP client and a concurrency limiter.
pub struct ProviderGateway {
    client: Client,
    creds: CredentialStore,
    limiter: Arc<Semaphore>,
}

impl ProviderGateway {
    pub fn new(creds: CredentialStore, config: ProviderGatewayConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| LlmError::unknown(&format!("provider client build failed: {err}")))?;

        Ok(Self {
            client,
            creds,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
        })
    }

    pub async fn complete(
        &self,
        target: &ModelTarget,
        messages: &[ChatMessage],
    ) -> Result<Completion, LlmError> {
        let plan = plan_call(target, &self.creds)?;
        let _permit = self.acquire().await?;

        match plan.family {
            WireFamily::OpenAi => openai::complete(&self.client, &plan, messages).await,
            WireFamily::Google => gemini::complete(&self.client, &plan, messages).await,
            WireFamily::Anthropic => claude::complete(&self.client, &plan, messages).await,
        }
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, LlmError> {
        self.limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|err| LlmError::unknown(&format!("provider limiter closed: {err}")))
    }
}

/// The seam callers program against, so orchestration can be exercised
/// without outbound HTTP.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        target: &ModelTarget,
        messages: &[ChatMessage],
    ) -> Result<Completion, LlmError>;
}

#[async_trait]
impl CompletionBackend for ProviderGateway {
    async fn complete(
        &self,
        target: &ModelTarget,
        messages: &[ChatMessage],
    ) -> Result<Completion, LlmError> {
        ProviderGateway::complete(self, target, messages).await
    }
}
