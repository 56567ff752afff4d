//! Webhook intake
//!
//! HMAC-SHA256 signature verification over the raw body, commenter
//! admission for PR-comment events, and enqueue of a trigger record.
//! Verification failures never enqueue anything; a missing secret is a
//! server misconfiguration, never a silent accept.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use reviewflow_core::{sanitize, EventEnvelope};
use reviewflow_engine::CommenterAdmission;
use reviewflow_queue::{Priority, QueueBroker, WorkItem, WorkPayload};
use reviewflow_storage::{CreateIntegrationEvent, WorkflowStore};

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_TYPE_HEADER: &str = "x-event-type";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Shared state for the webhook route.
#[derive(Clone)]
pub struct WebhookState {
    pub store: Arc<dyn WorkflowStore>,
    pub queue: Arc<dyn QueueBroker>,
    pub admission: Arc<CommenterAdmission>,
    /// The integration instance this endpoint serves
    pub integration_id: Uuid,
    pub secret: Option<String>,
}

/// Compute the signature header value for a body: `sha256=<hex-hmac>`.
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time verification of a `sha256=<hex>` signature header.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_digest) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// POST handler for the webhook endpoint.
pub async fn handle(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let Some(event_type) = headers
        .get(EVENT_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing event type header" })),
        );
    };

    // Signature gate. A configured secret makes the header mandatory;
    // an unconfigured secret is a deployment error, not an open door.
    let Some(secret) = &state.secret else {
        warn!("webhook received but no secret is configured");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "webhook secret not configured" })),
        );
    };
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "missing webhook signature header" })),
        );
    };
    if !verify_signature(secret, &body, signature) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid webhook signature" })),
        );
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": sanitize(&format!("malformed body: {err}")) })),
            );
        }
    };

    let event_id = payload
        .get("event_id")
        .or_else(|| payload.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let envelope = EventEnvelope::new(state.integration_id, event_type, event_id, payload);

    match process_envelope(&state, envelope).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "received": true }))),
        Err(err) => {
            warn!(error = %err, "webhook processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": sanitize(&format!("webhook processing failed: {err}"))
                })),
            )
        }
    }
}

/// Admission + ledger + enqueue for a verified envelope.
async fn process_envelope(
    state: &WebhookState,
    envelope: EventEnvelope,
) -> reviewflow_core::Result<()> {
    if envelope.is_pull_request_comment() {
        if let Some(username) = envelope.commenter().map(str::to_string) {
            if !state.admission.is_allowed(&username).await? {
                info!(username, "comment filtered: commenter not admitted");
                handle_denied_commenter(state, &envelope, &username).await?;
                return Ok(());
            }
            state.admission.update_activity(&username, true).await?;
        } else {
            warn!("comment event without a username, skipping");
            return Ok(());
        }
    }

    // Ledger row; events for unregistered integrations still dispatch
    let integration_event_id = match state
        .store
        .create_integration_event(CreateIntegrationEvent {
            integration_id: envelope.integration_id,
            event_type: envelope.event_type.clone(),
            event_id: envelope.event_id.clone(),
            payload: envelope.payload.clone(),
        })
        .await
    {
        Ok(row) => Some(row.id),
        Err(err) => {
            warn!(error = %err, "could not record integration event");
            None
        }
    };

    state
        .queue
        .enqueue(WorkItem::new(
            WorkPayload::Event {
                envelope,
                integration_event_id,
            },
            Priority::Normal,
        ))
        .await?;
    Ok(())
}

/// Auto-add path for denied commenters. The comment itself is never
/// processed; at most the commenter is registered and an auto-reply
/// side effect is queued.
async fn handle_denied_commenter(
    state: &WebhookState,
    envelope: &EventEnvelope,
    username: &str,
) -> reviewflow_core::Result<()> {
    let Some(settings) = state.admission.settings().await? else {
        return Ok(());
    };
    if !settings.auto_add_commenters {
        return Ok(());
    }

    state
        .admission
        .add(
            username,
            envelope.commenter_id(),
            Some("auto"),
            Some("automatically added on first comment"),
        )
        .await?;

    if let Some(message) = state.admission.auto_reply_message(username).await? {
        state
            .queue
            .enqueue(WorkItem::new(
                WorkPayload::AutoReply {
                    integration_id: envelope.integration_id,
                    username: username.to_string(),
                    message,
                    comment_url: envelope.comment_url().map(str::to_string),
                },
                Priority::Low,
            ))
            .await?;
    }
    Ok(())
}
