pub use crate::chat::{ChatMessage, Completion, ContentPart, Role, Usage};
pub use crate::errors::LlmError;
pub use crate::imagegen::{
    is_image_model, wants_image, GeneratedImage, ImageGenerator, ImageOutput,
};
pub use crate::provider::{
    plan_call, CallPlan, CompletionBackend, CredentialStore, ModelTarget, ProviderGateway,
    ProviderGatewayConfig, WireFamily, OPENROUTER_BASE_URL,
};
