//! Per-conversation inbound queues.
//!
//! The webhook must answer quickly, so messages are handed to a worker task
//! per sender. Each worker drains its queue in arrival order and exits after
//! a quiet period.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use arogya_core::{bot::Dispatcher, domain::ConversationId, messaging::types::InboundMessage};

const DEFAULT_IDLE: Duration = Duration::from_secs(60);

type Queues = Arc<Mutex<HashMap<ConversationId, mpsc::UnboundedSender<InboundMessage>>>>;

#[derive(Clone)]
pub struct Inbox {
    dispatcher: Arc<Dispatcher>,
    queues: Queues,
    idle: Duration,
}

impl Inbox {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self::with_idle_timeout(dispatcher, DEFAULT_IDLE)
    }

    pub fn with_idle_timeout(dispatcher: Arc<Dispatcher>, idle: Duration) -> Self {
        Self {
            dispatcher,
            queues: Arc::new(Mutex::new(HashMap::new())),
            idle,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Number of conversations with a live worker.
    pub async fn active(&self) -> usize {
        self.queues.lock().await.len()
    }

    /// Queue a message behind any earlier ones from the same sender.
    pub async fn push(&self, msg: InboundMessage) {
        let mut queues = self.queues.lock().await;

        let msg = match queues.get(&msg.from) {
            Some(tx) => match tx.send(msg) {
                Ok(()) => return,
                // Worker already gone; start a fresh one below.
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let id = msg.from.clone();
        // Receiver is alive, cannot fail.
        let _ = tx.send(msg);
        queues.insert(id.clone(), tx);
        drop(queues);

        tokio::spawn(worker(
            id,
            rx,
            self.dispatcher.clone(),
            self.queues.clone(),
            self.idle,
        ));
    }
}

async fn worker(
    id: ConversationId,
    mut rx: mpsc::UnboundedReceiver<InboundMessage>,
    dispatcher: Arc<Dispatcher>,
    queues: Queues,
    idle: Duration,
) {
    loop {
        match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(msg)) => dispatcher.dispatch(msg).await,
            Ok(None) => break,
            Err(_) => {
                // Re-check under the map lock so a concurrent push is never lost.
                let mut map = queues.lock().await;
                match rx.try_recv() {
                    Ok(msg) => {
                        drop(map);
                        dispatcher.dispatch(msg).await;
                    }
                    Err(_) => {
                        map.remove(&id);
                        break;
                    }
                }
            }
        }
    }
    debug!(conversation = %id, "inbox worker stopped");
}
