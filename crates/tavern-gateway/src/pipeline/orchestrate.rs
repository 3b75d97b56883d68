//! Concurrent fan-out: one timed call per resolved model, wait for all,
//! collect each outcome. Every resolved model yields exactly one outcome,
//! image models included. Single-model errors propagate; multi-model
//! failures are embedded inline.

use futures_util::future::join_all;
use tavern_errors::prelude::{codes, ErrorBuilder};
use tavern_llm::prelude::{
    is_image_model, wants_image, ChatMessage, ImageOutput, LlmError, ModelTarget, Usage,
};
use tavern_storage::prelude::Role as Persona;
use tavern_types::prelude::{now_ms, UserId};
use tracing::{info, warn};

use crate::errors::GatewayError;
use crate::state::AppState;

pub const MULTI_MODEL_MARKER: &str = "multi-model";

#[derive(Clone, Debug)]
pub struct ModelSection {
    pub model_id: String,
    pub display_name: String,
    pub content: Option<String>,
    pub error: Option<String>,
    pub usage: Usage,
}

#[derive(Clone, Debug)]
pub struct Aggregate {
    pub content: String,
    pub usage: Usage,
    pub model_used: String,
    pub sections: Vec<ModelSection>,
    pub image_url: Option<String>,
}

pub fn is_artist(persona: &Persona) -> bool {
    persona.slug == "artist" || persona.slug.ends_with("-artist")
}

/// Image generation fires only for the artist persona, and only when the
/// message carries image intent or a resolved model is itself an image
/// model.
pub fn image_trigger(persona: &Persona, message: &str, targets: &[ModelTarget]) -> bool {
    is_artist(persona)
        && (wants_image(message) || targets.iter().any(|t| is_image_model(&t.model_id)))
}

pub async fn run(
    state: &AppState,
    persona: &Persona,
    user: &UserId,
    targets: &[ModelTarget],
    messages: &[ChatMessage],
    image_prompt: &str,
    generate_image: bool,
) -> Result<Aggregate, GatewayError> {
    let single_mode = targets.len() == 1;
    let chat_targets: Vec<&ModelTarget> = targets
        .iter()
        .filter(|target| !is_image_model(&target.model_id))
        .collect();

    let calls = chat_targets.iter().map(|target| async move {
        match tokio::time::timeout(state.call_timeout, state.chat.complete(target, messages)).await
        {
            Ok(result) => result.map_err(GatewayError::from),
            Err(_) => Err(GatewayError::from(LlmError::provider_unavailable(
                &format!("model '{}' timed out", target.model_id),
            ))),
        }
    });
    let mut chat_results = join_all(calls).await.into_iter();

    // The image call goes to the first image model, or to a chat target
    // when the trigger came from a keyword alone.
    let image_target = if generate_image {
        targets
            .iter()
            .find(|t| is_image_model(&t.model_id))
            .or_else(|| targets.first())
    } else {
        None
    };
    let mut image_outcome = match image_target {
        Some(target) => Some((
            target.model_id.clone(),
            generate_and_promote(state, persona, user, target, image_prompt).await,
        )),
        None => None,
    };

    let mut sections = Vec::with_capacity(targets.len());
    let mut image_url: Option<String> = None;
    for target in targets {
        if is_image_model(&target.model_id) {
            let drives_the_image = matches!(
                &image_outcome,
                Some((model_id, _)) if *model_id == target.model_id
            );
            let outcome = if drives_the_image {
                image_outcome.take().map(|(_, outcome)| outcome)
            } else {
                None
            };
            sections.push(match outcome {
                Some(Ok(url)) => {
                    info!(model = %target.model_id, "image generated");
                    let markdown = format!("![Generated image]({url})");
                    image_url = Some(url);
                    ModelSection {
                        model_id: target.model_id.clone(),
                        display_name: target.display_name.clone(),
                        content: Some(markdown),
                        error: None,
                        usage: Usage::default(),
                    }
                }
                Some(Err(err)) => {
                    if single_mode {
                        return Err(err);
                    }
                    warn!(model = %target.model_id, error = %err, "image generation failed in multi-model mode");
                    ModelSection {
                        model_id: target.model_id.clone(),
                        display_name: target.display_name.clone(),
                        content: None,
                        error: Some(err.0.user_msg.clone()),
                        usage: Usage::default(),
                    }
                }
                // An image model this turn cannot drive still counts as
                // one outcome.
                None => {
                    let err = image_only_failure(&target.model_id);
                    if single_mode {
                        return Err(err);
                    }
                    warn!(model = %target.model_id, "image model requested without an image turn");
                    ModelSection {
                        model_id: target.model_id.clone(),
                        display_name: target.display_name.clone(),
                        content: None,
                        error: Some(err.0.user_msg.clone()),
                        usage: Usage::default(),
                    }
                }
            });
            continue;
        }
        let Some(result) = chat_results.next() else {
            continue;
        };
        match result {
            Ok(completion) => {
                info!(model = %target.model_id, tokens = completion.usage.total_tokens, "model call succeeded");
                sections.push(ModelSection {
                    model_id: target.model_id.clone(),
                    display_name: target.display_name.clone(),
                    content: Some(completion.content),
                    error: None,
                    usage: completion.usage,
                });
            }
            Err(err) => {
                if single_mode {
                    return Err(err);
                }
                warn!(model = %target.model_id, error = %err, "model call failed in multi-model mode");
                sections.push(ModelSection {
                    model_id: target.model_id.clone(),
                    display_name: target.display_name.clone(),
                    content: None,
                    error: Some(err.0.user_msg.clone()),
                    usage: Usage::default(),
                });
            }
        }
    }

    // A keyword-triggered image on a chat-only model list rides along
    // outside the per-model sections.
    let mut standalone_image: Option<String> = None;
    if let Some((_, outcome)) = image_outcome.take() {
        match outcome {
            Ok(url) => {
                standalone_image = Some(url.clone());
                image_url = Some(url);
            }
            Err(err) if sections.iter().any(|s| s.content.is_some()) => {
                warn!(error = %err, "image generation failed, continuing with text only");
            }
            Err(err) => return Err(err),
        }
    }

    let mut usage = Usage::default();
    for section in sections.iter().filter(|s| s.content.is_some()) {
        usage.add(&section.usage);
    }

    let mut content = if targets.len() > 1 {
        sections
            .iter()
            .map(|section| match (&section.content, &section.error) {
                (Some(text), _) => format!("**{}**:\n{}", section.display_name, text),
                (None, Some(message)) => {
                    format!("**{}**: (failed: {})", section.display_name, message)
                }
                (None, None) => format!("**{}**: (no output)", section.display_name),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    } else {
        sections
            .first()
            .and_then(|section| section.content.clone())
            .unwrap_or_default()
    };

    if let Some(url) = &standalone_image {
        let markdown = format!("![Generated image]({url})");
        if content.is_empty() {
            content = markdown;
        } else {
            content = format!("{content}\n\n{markdown}");
        }
    }

    let model_used = if targets.len() > 1 {
        MULTI_MODEL_MARKER.to_string()
    } else {
        targets[0].model_id.clone()
    };

    Ok(Aggregate {
        content,
        usage,
        model_used,
        sections,
        image_url,
    })
}

/// One image call; base64 results are decoded and promoted to object
/// storage under a per-user path. Upload failure is non-fatal.
async fn generate_and_promote(
    state: &AppState,
    persona: &Persona,
    user: &UserId,
    target: &ModelTarget,
    prompt: &str,
) -> Result<String, GatewayError> {
    let image = state.images.generate(target, prompt).await?;
    match &image.output {
        ImageOutput::Url(url) => Ok(url.clone()),
        ImageOutput::Base64 { data, mime } => {
            let bytes = image.output.decode_base64()?;
            let path = format!(
                "{}/{}/{}.{}",
                user,
                persona.slug,
                now_ms().0,
                ext_from_mime(mime)
            );
            match state
                .objects
                .put_public(&path, bytes, mime)
                .await
            {
                Ok(url) => {
                    info!(%path, "generated image promoted to object storage");
                    Ok(url)
                }
                Err(err) => {
                    warn!(error = %err, "image upload failed, keeping inline data url");
                    Ok(format!("data:{mime};base64,{data}"))
                }
            }
        }
    }
}

fn image_only_failure(model_id: &str) -> GatewayError {
    GatewayError(Box::new(
        ErrorBuilder::new(codes::SCHEMA_VALIDATION)
            .user_msg(format!("Model '{model_id}' only generates images."))
            .dev_msg(format!(
                "model '{model_id}' is an image generator and no image was requested this turn"
            ))
            .build(),
    ))
}

fn ext_from_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tavern_types::prelude::Id;

    fn persona(slug: &str) -> Persona {
        Persona {
            id: Id("role-1".into()),
            slug: slug.into(),
            system_prompt: None,
            default_model: "gpt-4o-mini".into(),
        }
    }

    fn target(model_id: &str) -> ModelTarget {
        ModelTarget {
            model_id: model_id.into(),
            provider: "openai".into(),
            model_name: model_id.into(),
            display_name: model_id.into(),
            api_key_env: None,
            base_url: None,
        }
    }

    #[test]
    fn image_trigger_requires_the_artist_persona() {
        let targets = vec![target("flux-dev")];
        assert!(image_trigger(&persona("luna-artist"), "hello", &targets));
        assert!(!image_trigger(&persona("mori-researcher"), "draw a cat", &targets));
    }

    #[test]
    fn artist_with_plain_chat_model_needs_image_intent() {
        let targets = vec![target("gpt-4o-mini")];
        assert!(!image_trigger(
            &persona("luna-artist"),
            "summarize this meeting",
            &targets
        ));
        assert!(image_trigger(&persona("luna-artist"), "draw a cat", &targets));
    }

    #[test]
    fn mime_extension_mapping() {
        assert_eq!(ext_from_mime("image/png"), "png");
        assert_eq!(ext_from_mime("image/jpeg"), "jpg");
        assert_eq!(ext_from_mime("application/octet-stream"), "png");
    }
}
