use crate::domain::{ConversationId, MessageId};

/// Transport message type, as reported by the WhatsApp client (`type` field).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Chat,
    Image,
    Document,
    Audio,
    Video,
    Sticker,
    Other(String),
}

impl MessageKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "chat" => MessageKind::Chat,
            "image" => MessageKind::Image,
            "document" => MessageKind::Document,
            "audio" | "ptt" => MessageKind::Audio,
            "video" => MessageKind::Video,
            "sticker" => MessageKind::Sticker,
            other => MessageKind::Other(other.to_string()),
        }
    }
}

/// Cross-messenger inbound message model.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub id: MessageId,
    pub from: ConversationId,
    pub body: Option<String>,
    pub caption: Option<String>,
    pub kind: MessageKind,
    pub mimetype: Option<String>,
    pub is_group: bool,
    pub is_media: bool,
}

impl InboundMessage {
    /// Plain text message (handy for tests and non-WhatsApp adapters).
    pub fn text(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: MessageId(String::new()),
            from: ConversationId::new(from),
            body: Some(body.into()),
            caption: None,
            kind: MessageKind::Chat,
            mimetype: None,
            is_group: false,
            is_media: false,
        }
    }

    /// Media message with an optional caption.
    pub fn media(
        from: impl Into<String>,
        id: impl Into<String>,
        kind: MessageKind,
        mimetype: impl Into<String>,
        caption: Option<String>,
    ) -> Self {
        Self {
            id: MessageId(id.into()),
            from: ConversationId::new(from),
            body: None,
            caption,
            kind,
            mimetype: Some(mimetype.into()),
            is_group: false,
            is_media: true,
        }
    }

    /// True for anything the bot should treat as a file attachment.
    pub fn has_media(&self) -> bool {
        self.is_media || matches!(self.kind, MessageKind::Image | MessageKind::Document)
    }

    /// Message body with surrounding whitespace removed (empty when absent).
    pub fn trimmed_body(&self) -> &str {
        self.body.as_deref().map(str::trim).unwrap_or("")
    }
}

/// Downloaded media bytes.
#[derive(Clone, Debug)]
pub struct MediaPayload {
    pub bytes: Vec<u8>,
    pub mimetype: Option<String>,
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub max_message_len: usize,
}
