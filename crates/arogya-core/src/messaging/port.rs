use async_trait::async_trait;

use crate::{
    domain::ConversationId,
    messaging::types::{InboundMessage, MediaPayload, MessagingCapabilities},
    Result,
};

/// Cross-messenger port.
///
/// The transport client stays a black box behind this trait: the bot only
/// needs to send plain text and to fetch the bytes of an inbound media message.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_text(&self, to: &ConversationId, text: &str) -> Result<()>;

    async fn download_media(&self, msg: &InboundMessage) -> Result<MediaPayload>;
}
