// Authorization collaborator interface
//
// The engine consumes, but does not define, the policy model. It calls
// `authorize` before every action and records each decision in an
// append-only audit log with a sanitized reason.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use reviewflow_core::{sanitize, Result};

/// Subject, resource, and requested action of an authorization check.
#[derive(Debug, Clone)]
pub struct AuthorizationContext {
    pub user_id: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub resource_type: String,
    pub resource_id: String,
    pub action: String,
}

impl AuthorizationContext {
    pub fn for_workflow_action(
        user_id: impl Into<String>,
        workflow_id: Uuid,
        action: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            roles: Vec::new(),
            permissions: Vec::new(),
            resource_type: "workflow".to_string(),
            resource_id: workflow_id.to_string(),
            action: action.into(),
        }
    }
}

/// Decides whether a subject may perform an action on a resource.
///
/// The real policy engine lives outside the core; production wires one
/// in, tests use [`AllowAll`] or a static deny list.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, context: &AuthorizationContext) -> Result<bool>;
}

/// Permits everything. The default when no policy engine is configured.
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _context: &AuthorizationContext) -> Result<bool> {
        Ok(true)
    }
}

/// One recorded authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor: String,
    pub resource_type: String,
    pub resource_id: String,
    pub action: String,
    pub granted: bool,
    /// Sanitized before recording; never carries secrets
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only audit log of authorization decisions.
#[derive(Default)]
pub struct AccessAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AccessAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, context: &AuthorizationContext, granted: bool, reason: &str) -> Uuid {
        let entry = AuditEntry {
            id: Uuid::now_v7(),
            actor: context.user_id.clone(),
            resource_type: context.resource_type.clone(),
            resource_id: context.resource_id.clone(),
            action: context.action.clone(),
            granted,
            reason: sanitize(reason),
            timestamp: Utc::now(),
        };
        let id = entry.id;

        tracing::debug!(
            decision = %id,
            actor = %entry.actor,
            action = %entry.action,
            granted,
            "authorization decision"
        );
        self.entries.lock().push(entry);
        id
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allow_all() {
        let context =
            AuthorizationContext::for_workflow_action("system", Uuid::now_v7(), "echo");
        assert!(AllowAll.authorize(&context).await.unwrap());
    }

    #[test]
    fn test_audit_reason_is_sanitized() {
        let log = AccessAuditLog::new();
        let context =
            AuthorizationContext::for_workflow_action("alice", Uuid::now_v7(), "llm_complete");
        log.record(&context, false, "denied: api_key=supersecret123 leaked in policy");

        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].granted);
        assert!(entries[0].reason.contains("api_key=****"));
        assert!(!entries[0].reason.contains("supersecret123"));
    }
}
