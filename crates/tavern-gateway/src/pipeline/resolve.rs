use tavern_llm::prelude::ModelTarget;
use tavern_storage::prelude::{ChatStore, ModelConfig, Role};
use uuid::Uuid;

use crate::errors::GatewayError;

/// Short names accepted in place of canonical persona slugs.
const ROLE_ALIASES: &[(&str, &str)] = &[
    ("mori", "mori-researcher"),
    ("luna", "luna-artist"),
    ("sage", "sage-tutor"),
];

/// UUIDs look up by id; anything else maps through the alias table and
/// looks up by slug. A persona is mandatory.
pub async fn resolve_role(
    store: &dyn ChatStore,
    companion_id: &str,
) -> Result<Role, GatewayError> {
    if Uuid::parse_str(companion_id).is_ok() {
        return store
            .role_by_id(companion_id)
            .await?
            .ok_or_else(|| GatewayError::config_missing(&format!("no role with id '{companion_id}'")));
    }

    let slug = ROLE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == companion_id)
        .map(|(_, slug)| *slug)
        .unwrap_or(companion_id);

    store
        .role_by_slug(slug)
        .await?
        .ok_or_else(|| GatewayError::config_missing(&format!("no role with slug '{slug}'")))
}

pub fn split_model_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Comma-split override or the persona default; one batch lookup; any
/// missing id fails the whole request.
pub async fn resolve_models(
    store: &dyn ChatStore,
    override_ids: Option<&str>,
    role: &Role,
) -> Result<Vec<ModelTarget>, GatewayError> {
    let raw = override_ids.unwrap_or(&role.default_model);
    let ids = split_model_ids(raw);
    if ids.is_empty() {
        return Err(GatewayError::config_missing(
            "no model ids resolved for this request",
        ));
    }

    let configs = store.models_by_ids(&ids).await?;
    let mut targets = Vec::with_capacity(ids.len());
    for id in &ids {
        let config = configs
            .iter()
            .find(|config| &config.model_id == id)
            .ok_or_else(|| GatewayError::config_missing(&format!("model '{id}' is not configured")))?;
        targets.push(to_target(config));
    }
    Ok(targets)
}

fn to_target(config: &ModelConfig) -> ModelTarget {
    ModelTarget {
        model_id: config.model_id.clone(),
        provider: config.provider.clone(),
        model_name: config.model_name.clone(),
        display_name: config.display_name.clone(),
        api_key_env: config.api_key_env.clone(),
        base_url: config.base_url.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tavern_storage::prelude::MemoryStore;
    use tavern_types::prelude::Id;

    fn seed_role(store: &MemoryStore, id: &str, slug: &str) {
        store.add_role(Role {
            id: Id(id.into()),
            slug: slug.into(),
            system_prompt: None,
            default_model: "gpt-4o-mini".into(),
        });
    }

    fn seed_model(store: &MemoryStore, id: &str) {
        store.add_model(ModelConfig {
            model_id: id.into(),
            provider: "openai".into(),
            model_name: id.into(),
            display_name: id.into(),
            api_key_env: Some("OPENAI_API_KEY".into()),
            base_url: None,
        });
    }

    #[tokio::test]
    async fn alias_and_canonical_slug_resolve_to_the_same_role() {
        let store = MemoryStore::new();
        seed_role(&store, "role-mori", "mori-researcher");

        let by_alias = resolve_role(&store, "mori").await.unwrap();
        let by_slug = resolve_role(&store, "mori-researcher").await.unwrap();
        assert_eq!(by_alias, by_slug);
    }

    #[tokio::test]
    async fn uuid_companion_looks_up_by_id() {
        let store = MemoryStore::new();
        let id = uuid::Uuid::new_v4().to_string();
        seed_role(&store, &id, "custom-persona");

        let role = resolve_role(&store, &id).await.unwrap();
        assert_eq!(role.slug, "custom-persona");
    }

    #[tokio::test]
    async fn unknown_alias_falls_through_verbatim_and_fails() {
        let store = MemoryStore::new();
        seed_role(&store, "role-mori", "mori-researcher");

        let err = resolve_role(&store, "nonexistent").await.unwrap_err();
        assert_eq!(err.code(), "CONFIG.MISSING");
        assert!(err.to_string().contains("nonexistent"));
    }

    #[tokio::test]
    async fn model_list_is_comma_split_and_trimmed() {
        let store = MemoryStore::new();
        seed_role(&store, "r", "mori-researcher");
        seed_model(&store, "gpt-4o-mini");
        seed_model(&store, "claude-sonnet-4");
        let role = resolve_role(&store, "mori").await.unwrap();

        let targets = resolve_models(&store, Some(" gpt-4o-mini , claude-sonnet-4 ,"), &role)
            .await
            .unwrap();
        let ids: Vec<_> = targets.iter().map(|t| t.model_id.as_str()).collect();
        assert_eq!(ids, vec!["gpt-4o-mini", "claude-sonnet-4"]);
    }

    #[tokio::test]
    async fn missing_model_fails_the_whole_request() {
        let store = MemoryStore::new();
        seed_role(&store, "r", "mori-researcher");
        seed_model(&store, "gpt-4o-mini");
        let role = resolve_role(&store, "mori").await.unwrap();

        let err = resolve_models(&store, Some("gpt-4o-mini,ghost-model"), &role)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG.MISSING");
        assert!(err.to_string().contains("ghost-model"));
    }

    #[tokio::test]
    async fn role_default_applies_without_an_override() {
        let store = MemoryStore::new();
        seed_role(&store, "r", "mori-researcher");
        seed_model(&store, "gpt-4o-mini");
        let role = resolve_role(&store, "mori").await.unwrap();

        let targets = resolve_models(&store, None, &role).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].model_id, "gpt-4o-mini");
    }
}
