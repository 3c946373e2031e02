use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::ConversationId,
    messaging::{
        port::MessagingPort,
        types::{InboundMessage, MediaPayload, MessagingCapabilities},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* outbound calls.
    pub global_min_interval: Duration,
    /// Minimum spacing between sends to the same conversation.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),
            per_chat_min_interval: Duration::from_millis(250),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// MessagingPort decorator that rate-limits outbound calls.
///
/// The bot often sends two or three texts back to back (status, answer, menu).
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<HashMap<ConversationId, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for_chat(&self, to: &ConversationId) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_chat.lock().await;
        map.entry(to.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_chat_min_interval,
                )))
            })
            .clone()
    }

    /// Number of conversations with a live per-chat limiter.
    pub async fn tracked_conversations(&self) -> usize {
        self.per_chat.lock().await.len()
    }

    /// Drop per-conversation limiters nobody holds whose next slot has passed.
    /// Returns how many were removed.
    pub async fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let mut map = self.per_chat.lock().await;
        let before = map.len();
        map.retain(|_, lim| {
            Arc::strong_count(lim) > 1
                || lim.try_lock().map(|l| l.next > now).unwrap_or(true)
        });
        before - map.len()
    }

    async fn throttle_chat(&self, to: &ConversationId) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = {
            let lim = self.limiter_for_chat(to).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(chat_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    async fn throttle_global(&self) {
        let wait = { self.global.lock().await.reserve() };
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_text(&self, to: &ConversationId, text: &str) -> Result<()> {
        self.throttle_chat(to).await;
        self.inner.send_text(to, text).await
    }

    async fn download_media(&self, msg: &InboundMessage) -> Result<MediaPayload> {
        // Downloads are not user-visible; global spacing only.
        self.throttle_global().await;
        self.inner.download_media(msg).await
    }
}
