// Commenter admission service
//
// Whitelist/blacklist gate over inbound comment events. Thin
// CRUD-plus-decision layer over the store; the intake asks `is_allowed`
// before an event reaches the queue.

use std::sync::Arc;

use tracing::info;

use reviewflow_core::Result;
use reviewflow_storage::{
    AllowedCommenterRow, CommentFilterSettingsRow, UpdateFilterSettings, UpsertCommenter,
    WorkflowStore,
};

/// Decides whether a commenter's events are processed.
pub struct CommenterAdmission {
    store: Arc<dyn WorkflowStore>,
}

impl CommenterAdmission {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    pub async fn settings(&self) -> Result<Option<CommentFilterSettingsRow>> {
        Ok(self.store.get_filter_settings().await?)
    }

    pub async fn update_settings(
        &self,
        input: UpdateFilterSettings,
    ) -> Result<CommentFilterSettingsRow> {
        Ok(self.store.update_filter_settings(input).await?)
    }

    /// Whether this commenter passes the filter.
    ///
    /// Filtering disabled (or never configured) admits everyone. In
    /// whitelist mode a commenter passes iff their row exists and is
    /// enabled; in blacklist mode everyone passes except rows that
    /// exist and are disabled.
    pub async fn is_allowed(&self, username: &str) -> Result<bool> {
        let Some(settings) = self.store.get_filter_settings().await? else {
            return Ok(true);
        };
        if !settings.enabled {
            return Ok(true);
        }

        let commenter = self.store.get_commenter(username).await?;
        Ok(if settings.whitelist_mode {
            commenter.is_some_and(|c| c.enabled)
        } else {
            commenter.is_none_or(|c| c.enabled)
        })
    }

    /// Idempotent upsert; re-enables a previously removed commenter.
    pub async fn add(
        &self,
        username: &str,
        external_user_id: Option<i64>,
        added_by: Option<&str>,
        notes: Option<&str>,
    ) -> Result<AllowedCommenterRow> {
        let row = self
            .store
            .upsert_commenter(UpsertCommenter {
                external_username: username.to_string(),
                external_user_id,
                added_by: added_by.map(str::to_string),
                notes: notes.map(str::to_string),
            })
            .await?;
        info!(username, "commenter added to allowed list");
        Ok(row)
    }

    /// Soft-disable; the row and its counters stay.
    pub async fn remove(&self, username: &str) -> Result<bool> {
        let disabled = self.store.disable_commenter(username).await?;
        if disabled {
            info!(username, "commenter disabled");
        }
        Ok(disabled)
    }

    pub async fn update_activity(
        &self,
        username: &str,
        increment: bool,
    ) -> Result<Option<AllowedCommenterRow>> {
        Ok(self
            .store
            .record_commenter_activity(username, increment)
            .await?)
    }

    pub async fn list(
        &self,
        enabled_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AllowedCommenterRow>> {
        Ok(self
            .store
            .list_commenters(enabled_only, limit, offset)
            .await?)
    }

    /// The formatted auto-reply for a newly added commenter, when
    /// auto-reply is enabled. `{username}` is substituted literally;
    /// the braces are not general interpolation.
    pub async fn auto_reply_message(&self, username: &str) -> Result<Option<String>> {
        let Some(settings) = self.store.get_filter_settings().await? else {
            return Ok(None);
        };
        if !settings.auto_reply_enabled {
            return Ok(None);
        }
        Ok(Some(
            settings.auto_reply_message.replace("{username}", username),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewflow_storage::InMemoryWorkflowStore;

    fn admission() -> CommenterAdmission {
        CommenterAdmission::new(Arc::new(InMemoryWorkflowStore::new()))
    }

    #[tokio::test]
    async fn test_allows_everyone_when_unconfigured() {
        let admission = admission();
        assert!(admission.is_allowed("anyone").await.unwrap());
    }

    #[tokio::test]
    async fn test_allows_everyone_when_disabled() {
        let admission = admission();
        admission
            .update_settings(UpdateFilterSettings {
                enabled: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(admission.is_allowed("anyone").await.unwrap());
    }

    #[tokio::test]
    async fn test_whitelist_mode() {
        let admission = admission();
        admission
            .update_settings(UpdateFilterSettings {
                enabled: Some(true),
                whitelist_mode: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        admission.add("alice", None, Some("admin"), None).await.unwrap();
        admission.add("bob", None, None, None).await.unwrap();
        admission.remove("bob").await.unwrap();

        // Pass set = { row exists AND enabled }
        assert!(admission.is_allowed("alice").await.unwrap());
        assert!(!admission.is_allowed("bob").await.unwrap());
        assert!(!admission.is_allowed("mallory").await.unwrap());
    }

    #[tokio::test]
    async fn test_blacklist_mode() {
        let admission = admission();
        admission
            .update_settings(UpdateFilterSettings {
                enabled: Some(true),
                whitelist_mode: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        admission.add("alice", None, None, None).await.unwrap();
        admission.add("bob", None, None, None).await.unwrap();
        admission.remove("bob").await.unwrap();

        // Pass set = { row absent OR enabled }
        assert!(admission.is_allowed("alice").await.unwrap());
        assert!(!admission.is_allowed("bob").await.unwrap());
        assert!(admission.is_allowed("mallory").await.unwrap());
    }

    #[tokio::test]
    async fn test_activity_counters() {
        let admission = admission();
        admission.add("alice", Some(42), None, None).await.unwrap();

        let row = admission.update_activity("alice", true).await.unwrap().unwrap();
        assert_eq!(row.comment_count, 1);
        assert!(row.last_comment_at.is_some());

        let row = admission.update_activity("alice", false).await.unwrap().unwrap();
        assert_eq!(row.comment_count, 1);

        assert!(admission.update_activity("ghost", true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_auto_reply_formatting() {
        let admission = admission();
        assert_eq!(admission.auto_reply_message("alice").await.unwrap(), None);

        admission
            .update_settings(UpdateFilterSettings {
                auto_reply_enabled: Some(true),
                auto_reply_message: Some("Welcome, @{username}! {not_a_field}".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let message = admission.auto_reply_message("alice").await.unwrap().unwrap();
        // Only {username} is substituted; other braces pass through
        assert_eq!(message, "Welcome, @alice! {not_a_field}");
    }
}
