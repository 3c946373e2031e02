use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{debug, warn};

use crate::{event::WebhookEvent, router::AppState};

pub const SECRET_HEADER: &str = "x-webhook-secret";

fn reject(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "ok": false, "error": error }))).into_response()
}

/// `POST /webhook`: accept a WPPConnect event and queue it for the bot.
///
/// The reply never waits on the bot: messages are handed to the inbox and
/// processed in the background.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = state.webhook_secret.as_deref() {
        let given = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if given != Some(secret) {
            warn!("webhook call with missing or wrong secret");
            return reject(StatusCode::UNAUTHORIZED, "unauthorized");
        }
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(ev) => ev,
        Err(e) => {
            warn!(error = %e, "malformed webhook payload");
            return reject(StatusCode::BAD_REQUEST, "malformed payload");
        }
    };

    if let Some(session) = event.session.as_deref() {
        if session != state.wpp_session {
            debug!(session, "event for another session, ignoring");
            return Json(json!({ "ok": true })).into_response();
        }
    }

    let event_name = event.event.clone();
    match event.into_inbound() {
        Some(msg) => {
            debug!(conversation = %msg.from, kind = ?msg.kind, "inbound message");
            state.inbox.push(msg).await;
        }
        None => debug!(event = %event_name, "event ignored"),
    }

    Json(json!({ "ok": true })).into_response()
}
