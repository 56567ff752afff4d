// Inbound event envelope
//
// The intake wraps every verified webhook body in an EventEnvelope before
// it touches the queue. Downstream code (dispatcher, trigger predicates,
// admission) only ever sees the envelope, never raw HTTP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single external event as received from an integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Integration instance this event arrived through
    pub integration_id: Uuid,

    /// Event type from the `x-event-type` header
    pub event_type: String,

    /// Vendor-provided event identifier, when present
    pub event_id: Option<String>,

    /// Raw JSON body
    pub payload: Value,

    pub received_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(
        integration_id: Uuid,
        event_type: impl Into<String>,
        event_id: Option<String>,
        payload: Value,
    ) -> Self {
        Self {
            integration_id,
            event_type: event_type.into(),
            event_id,
            payload,
            received_at: Utc::now(),
        }
    }

    /// Deduplication key: `{integration_id}:{event_id}`.
    ///
    /// Events without a vendor id cannot be deduplicated and return None.
    pub fn dedup_key(&self) -> Option<String> {
        self.event_id
            .as_ref()
            .map(|event_id| format!("{}:{}", self.integration_id, event_id))
    }

    /// Whether this event is a comment on a pull request.
    ///
    /// Code hosts deliver PR comments as issue-comment events whose issue
    /// carries a `pull_request` reference.
    pub fn is_pull_request_comment(&self) -> bool {
        self.payload.get("comment").is_some()
            && self
                .payload
                .get("issue")
                .and_then(|issue| issue.get("pull_request"))
                .is_some()
    }

    /// Login of the commenting user, when this is a comment event
    pub fn commenter(&self) -> Option<&str> {
        self.payload
            .get("comment")?
            .get("user")?
            .get("login")?
            .as_str()
    }

    /// Vendor-side numeric id of the commenting user
    pub fn commenter_id(&self) -> Option<i64> {
        self.payload
            .get("comment")?
            .get("user")?
            .get("id")?
            .as_i64()
    }

    /// URL of the comment, used to address an auto-reply
    pub fn comment_url(&self) -> Option<&str> {
        self.payload.get("comment")?.get("url")?.as_str()
    }

    /// Envelope as a JSON document for predicate evaluation.
    ///
    /// Trigger conditions address `event_type` at the top level and the
    /// body under `payload`.
    pub fn as_document(&self) -> Value {
        serde_json::json!({
            "integration_id": self.integration_id,
            "event_type": self.event_type,
            "event_id": self.event_id,
            "payload": self.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn comment_payload() -> Value {
        json!({
            "action": "created",
            "issue": { "number": 7, "pull_request": { "url": "https://host/pr/7" } },
            "comment": {
                "url": "https://host/comment/1",
                "user": { "login": "alice", "id": 42 },
                "body": "looks good"
            }
        })
    }

    #[test]
    fn test_dedup_key() {
        let integration_id = Uuid::now_v7();
        let envelope = EventEnvelope::new(
            integration_id,
            "comment_created",
            Some("e1".to_string()),
            json!({}),
        );
        assert_eq!(
            envelope.dedup_key(),
            Some(format!("{integration_id}:e1"))
        );

        let anonymous = EventEnvelope::new(integration_id, "push", None, json!({}));
        assert_eq!(anonymous.dedup_key(), None);
    }

    #[test]
    fn test_pull_request_comment_detection() {
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            "issue_comment",
            None,
            comment_payload(),
        );
        assert!(envelope.is_pull_request_comment());
        assert_eq!(envelope.commenter(), Some("alice"));
        assert_eq!(envelope.commenter_id(), Some(42));
        assert_eq!(envelope.comment_url(), Some("https://host/comment/1"));

        let plain_issue = EventEnvelope::new(
            Uuid::now_v7(),
            "issue_comment",
            None,
            json!({ "issue": { "number": 7 }, "comment": { "body": "hi" } }),
        );
        assert!(!plain_issue.is_pull_request_comment());
    }
}
