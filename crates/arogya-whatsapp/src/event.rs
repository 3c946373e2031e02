//! WPPConnect webhook payloads.

use serde::Deserialize;

use arogya_core::{
    domain::{ConversationId, MessageId},
    messaging::types::{InboundMessage, MessageKind},
};

/// Message ids arrive either as a serialized string or as `{ "_serialized": ... }`.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum WppMessageId {
    Plain(String),
    Wrapped {
        #[serde(rename = "_serialized")]
        serialized: String,
    },
}

impl WppMessageId {
    fn into_string(self) -> String {
        match self {
            WppMessageId::Plain(s) => s,
            WppMessageId::Wrapped { serialized } => serialized,
        }
    }
}

/// Subset of the WPPConnect webhook body the bot needs.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub id: Option<WppMessageId>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub is_group_msg: bool,
    #[serde(default)]
    pub is_media: bool,
    #[serde(default)]
    pub from_me: bool,
}

impl WebhookEvent {
    /// Convert an `onmessage` event into the core message model.
    ///
    /// Returns `None` for other events, the bot's own messages, and messages
    /// without a sender.
    pub fn into_inbound(self) -> Option<InboundMessage> {
        if self.event != "onmessage" || self.from_me {
            return None;
        }
        let from = self.from.filter(|f| !f.is_empty())?;
        let is_group = self.is_group_msg || from.ends_with("@g.us");

        Some(InboundMessage {
            id: MessageId(self.id.map(WppMessageId::into_string).unwrap_or_default()),
            from: ConversationId(from),
            body: self.body,
            caption: self.caption,
            kind: MessageKind::parse(self.kind.as_deref().unwrap_or("chat")),
            mimetype: self.mimetype,
            is_group,
            is_media: self.is_media,
        })
    }
}
