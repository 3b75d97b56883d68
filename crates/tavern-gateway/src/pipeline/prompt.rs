use tavern_storage::prelude::{MindBlock, Role};

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI companion. Answer the user clearly and stay in character.";

/// Persona system prompt followed by every equipped mind block, blank-line
/// joined, in equip insertion order.
pub fn compose(role: &Role, blocks: &[MindBlock]) -> String {
    let mut sections = Vec::with_capacity(1 + blocks.len());
    sections.push(
        role.system_prompt
            .as_deref()
            .filter(|prompt| !prompt.trim().is_empty())
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
            .to_string(),
    );
    for block in blocks {
        sections.push(block_fragment(block));
    }
    sections.join("\n\n")
}

/// The compiled prompt when present, otherwise the raw JSON dump.
fn block_fragment(block: &MindBlock) -> String {
    block
        .compiled_prompt
        .as_deref()
        .filter(|prompt| !prompt.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| block.content_json.to_string())
}

pub fn block_titles(blocks: &[MindBlock]) -> Vec<String> {
    blocks.iter().map(|block| block.title.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tavern_types::prelude::Id;

    fn role(system_prompt: Option<&str>) -> Role {
        Role {
            id: Id("role-1".into()),
            slug: "mori-researcher".into(),
            system_prompt: system_prompt.map(str::to_string),
            default_model: "gpt-4o-mini".into(),
        }
    }

    fn block(title: &str, compiled: Option<&str>, content: serde_json::Value) -> MindBlock {
        MindBlock {
            id: Id(format!("block-{title}")),
            title: title.into(),
            content_json: content,
            compiled_prompt: compiled.map(str::to_string),
        }
    }

    #[test]
    fn persona_prompt_then_blocks_in_order() {
        let blocks = vec![
            block("tone", Some("Speak softly."), json!({})),
            block("facts", None, json!({"likes": "tea"})),
        ];
        let prompt = compose(&role(Some("You are Mori.")), &blocks);
        assert_eq!(prompt, "You are Mori.\n\nSpeak softly.\n\n{\"likes\":\"tea\"}");
    }

    #[test]
    fn missing_persona_prompt_falls_back_to_default() {
        let prompt = compose(&role(None), &[]);
        assert_eq!(prompt, DEFAULT_SYSTEM_PROMPT);

        let prompt = compose(&role(Some("   ")), &[]);
        assert_eq!(prompt, DEFAULT_SYSTEM_PROMPT);
    }
}
