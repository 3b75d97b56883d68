use regex::Regex;
use std::sync::OnceLock;
use tavern_llm::prelude::{ChatMessage, Role};
use tavern_storage::prelude::{ChatStore, SenderType};
use tavern_types::prelude::RoomId;

use crate::errors::GatewayError;

pub const BASE64_IMAGE_PLACEHOLDER: &str = "[Image: Base64 data removed]";

fn base64_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[[^\]]*\]\(data:image/[^)]*\)").unwrap())
}

/// Replaces every markdown image token whose target is an inline base64
/// payload, leaving surrounding text untouched. Keeps replayed history
/// bounded instead of resending binary blobs each turn.
pub fn sanitize(content: &str) -> String {
    base64_image_re()
        .replace_all(content, BASE64_IMAGE_PLACEHOLDER)
        .into_owned()
}

/// Last `limit` room messages, oldest first, mapped to chat roles.
pub async fn load(
    store: &dyn ChatStore,
    room: &RoomId,
    limit: usize,
) -> Result<Vec<ChatMessage>, GatewayError> {
    let mut records = store.recent_messages(room, limit).await?;
    records.reverse();
    Ok(records
        .into_iter()
        .map(|record| {
            let role = match record.sender_type {
                SenderType::User => Role::User,
                SenderType::Role => Role::Assistant,
            };
            ChatMessage::text(role, sanitize(&record.content))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tavern_storage::prelude::{MemoryStore, MessageRecord};
    use tavern_types::prelude::{Id, UserId};

    #[test]
    fn base64_image_tokens_are_replaced_exactly() {
        assert_eq!(
            sanitize("see this ![pic](data:image/png;base64,AAAA)"),
            "see this [Image: Base64 data removed]"
        );
    }

    #[test]
    fn regular_image_links_survive() {
        let content = "look ![cat](https://cdn.example/cat.png) done";
        assert_eq!(sanitize(content), content);
    }

    #[test]
    fn multiple_tokens_all_sanitize() {
        let content = "a ![x](data:image/png;base64,AA) b ![y](data:image/jpeg;base64,BB) c";
        assert_eq!(
            sanitize(content),
            "a [Image: Base64 data removed] b [Image: Base64 data removed] c"
        );
    }

    #[tokio::test]
    async fn history_is_oldest_first_and_role_mapped() {
        let store = MemoryStore::new();
        let room = RoomId("room-1".into());
        let user = UserId("user-1".into());
        for (i, (sender, content)) in [
            (SenderType::User, "hello"),
            (SenderType::Role, "hi there"),
            (SenderType::User, "again"),
        ]
        .into_iter()
        .enumerate()
        {
            store.add_message(MessageRecord {
                id: Id(format!("m{i}")),
                room_id: room.clone(),
                user_id: user.clone(),
                sender_type: sender,
                content: content.into(),
                model_used: None,
                content_json: None,
                created_at: i as i64,
            });
        }

        let history = load(&store, &room, 10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].joined_text(), "hello");
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[2].joined_text(), "again");
    }
}
