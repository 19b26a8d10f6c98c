use crate::content::items::ItemStatus;

/// A conversation message. The client only ever creates user text messages;
/// assistant messages are read back with their text parts.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<ItemStatus>,
    role: MessageRole,
    #[serde(default)]
    content: Vec<Content>,
}

impl MessageItem {
    pub fn builder() -> MessageItemBuilder {
        MessageItemBuilder::default()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn role(&self) -> MessageRole {
        self.role.clone()
    }

    pub fn content(&self) -> &[Content] {
        &self.content
    }
}

#[derive(Default)]
pub struct MessageItemBuilder {
    role: Option<MessageRole>,
    content: Vec<Content>,
}

impl MessageItemBuilder {
    pub fn with_role(mut self, role: MessageRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_input_text(mut self, text: &str) -> Self {
        self.content.push(Content::InputText(TextPart {
            text: text.to_string(),
        }));
        self
    }

    /// Defaults to a user message.
    pub fn build(self) -> MessageItem {
        MessageItem {
            id: None,
            status: None,
            role: self.role.unwrap_or(MessageRole::User),
            content: self.content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    InputText(TextPart),
    Text(TextPart),
    /// Audio parts are not read back; only their presence is kept.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TextPart {
    text: String,
}

impl TextPart {
    pub fn text(&self) -> &str {
        &self.text
    }
}
