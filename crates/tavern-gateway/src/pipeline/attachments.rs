use tavern_llm::prelude::{ChatMessage, ContentPart, Role};

use crate::pipeline::Attachment;

/// The final user turn. With attachments the content becomes a part list:
/// one text part, then one image part per image attachment. Non-image
/// attachment types are ignored at the multimodal layer.
pub fn build_user_message(message: &str, attachments: &[Attachment]) -> ChatMessage {
    let mut parts = vec![ContentPart::Text {
        text: message.to_string(),
    }];
    for attachment in attachments {
        if is_image(attachment) {
            parts.push(ContentPart::ImageUrl {
                url: attachment.url.clone(),
            });
        }
    }
    ChatMessage {
        role: Role::User,
        parts,
    }
}

fn is_image(attachment: &Attachment) -> bool {
    if attachment.kind.eq_ignore_ascii_case("image") {
        return true;
    }
    attachment
        .mime_type
        .as_deref()
        .map(|mime| mime.starts_with("image/"))
        .unwrap_or(false)
}
