//! WhatsApp adapter (WPPConnect server).
//!
//! The WhatsApp client itself runs inside a WPPConnect server. This crate
//! implements the `arogya-core` MessagingPort over its REST API and receives
//! inbound messages through its webhook.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

pub mod event;
pub mod handlers;
pub mod inbox;
pub mod router;

use arogya_core::{
    domain::ConversationId,
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{InboundMessage, MediaPayload, MessagingCapabilities},
    },
    Result,
};

const MAX_MESSAGE_LEN: usize = 4096;

#[derive(Clone, Debug)]
pub struct WppConfig {
    pub base_url: String,
    pub session: String,
    pub token: String,
    pub timeout: Duration,
}

/// Which failed responses `post_json` may repeat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Retry {
    /// 429 only. A 5xx may arrive after the message went out.
    RateLimited,
    /// 429 and 5xx; safe for reads.
    Transient,
}

impl Retry {
    fn allows(self, status: reqwest::StatusCode) -> bool {
        status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || (self == Retry::Transient && status.is_server_error())
    }
}

#[derive(Clone)]
pub struct WppConnectMessenger {
    cfg: WppConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest<'a> {
    phone: &'a str,
    message: &'a str,
    is_group: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadMediaRequest<'a> {
    message_id: &'a str,
}

#[derive(Deserialize)]
struct DownloadMediaResponse {
    base64: String,
    #[serde(default)]
    mimetype: Option<String>,
}

impl WppConnectMessenger {
    pub fn new(cfg: WppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| Error::Transport(format!("wpp http client build error: {e}")))?;
        Ok(Self { cfg, http })
    }

    fn url(&self, action: &str) -> String {
        format!(
            "{}/api/{}/{action}",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.session
        )
    }

    /// POST with at most one retry, as `retry` permits.
    async fn post_json<T: Serialize + ?Sized>(
        &self,
        action: &str,
        body: &T,
        retry: Retry,
    ) -> Result<reqwest::Response> {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            let resp = self
                .http
                .post(self.url(action))
                .bearer_auth(&self.cfg.token)
                .json(body)
                .send()
                .await
                .map_err(|e| Error::Transport(format!("wpp {action} request error: {e}")))?;

            let status = resp.status();
            if status.is_success() {
                return Ok(resp);
            }
            if retry.allows(status) && attempts < MAX_RETRIES {
                attempts += 1;
                sleep(Duration::from_millis(500)).await;
                continue;
            }

            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "wpp {action} failed: {status} {}",
                text.chars().take(200).collect::<String>()
            )));
        }
    }
}

/// WPPConnect wants the bare number for contacts (`15551234567@c.us` → `15551234567`).
fn phone_for(to: &ConversationId) -> &str {
    to.as_str()
        .strip_suffix("@c.us")
        .unwrap_or_else(|| to.as_str())
}

/// Decode media returned either as raw base64 or as a `data:<mime>;base64,` URL.
fn decode_media(raw: &str, mimetype: Option<String>) -> Result<MediaPayload> {
    let (data, mimetype) = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (meta, data) = rest
                .split_once(',')
                .ok_or_else(|| Error::Transport("malformed data url in media".to_string()))?;
            let from_url = meta
                .split(';')
                .next()
                .filter(|m| !m.is_empty())
                .map(str::to_string);
            (data, from_url.or(mimetype))
        }
        None => (raw, mimetype),
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| Error::Transport(format!("media base64 decode error: {e}")))?;
    Ok(MediaPayload { bytes, mimetype })
}

#[async_trait]
impl MessagingPort for WppConnectMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            max_message_len: MAX_MESSAGE_LEN,
        }
    }

    async fn send_text(&self, to: &ConversationId, text: &str) -> Result<()> {
        self.post_json(
            "send-message",
            &SendMessageRequest {
                phone: phone_for(to),
                message: text,
                is_group: false,
            },
            Retry::RateLimited,
        )
        .await?;
        Ok(())
    }

    async fn download_media(&self, msg: &InboundMessage) -> Result<MediaPayload> {
        if msg.id.0.is_empty() {
            return Err(Error::Transport("media message has no id".to_string()));
        }
        let resp = self
            .post_json(
                "download-media",
                &DownloadMediaRequest {
                    message_id: &msg.id.0,
                },
                // The WPPConnect server answers 5xx while its browser restarts.
                Retry::Transient,
            )
            .await?;
        let body: DownloadMediaResponse = resp
            .json()
            .await
            .map_err(|e| Error::Transport(format!("wpp download-media json error: {e}")))?;

        decode_media(&body.base64, body.mimetype.or_else(|| msg.mimetype.clone()))
    }
}
