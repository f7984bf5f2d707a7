//! Server notification model.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key in `data` that stops a notification from being mirrored by email.
pub const SKIP_EMAIL_MIRROR: &str = "skipEmailMirror";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NotificationType {
    DaoCreated,
    DaoUpdated,
    DaoDeleted,
    TaskUpdated,
    LeaderChanged,
    Comment,
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::DaoCreated => "daoCreated",
            NotificationType::DaoUpdated => "daoUpdated",
            NotificationType::DaoDeleted => "daoDeleted",
            NotificationType::TaskUpdated => "taskUpdated",
            NotificationType::LeaderChanged => "leaderChanged",
            NotificationType::Comment => "comment",
            NotificationType::System => "system",
        }
    }
}

/// Who a notification is addressed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind", content = "userIds")]
pub enum Recipients {
    All,
    Users(Vec<String>),
}

impl Recipients {
    pub fn includes(&self, user_id: &str) -> bool {
        match self {
            Recipients::All => true,
            Recipients::Users(ids) => ids.iter().any(|id| id == user_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerNotification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub recipients: Recipients,
    /// The only field mutated after creation.
    #[serde(default)]
    pub read_by: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl ServerNotification {
    pub fn skips_email_mirror(&self) -> bool {
        self.data
            .as_ref()
            .and_then(|d| d.get(SKIP_EMAIL_MIRROR))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.contains(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipients_serialization() {
        let all = serde_json::to_value(Recipients::All).unwrap();
        assert_eq!(all, serde_json::json!({ "kind": "all" }));

        let users = serde_json::to_value(Recipients::Users(vec!["u1".into()])).unwrap();
        assert_eq!(users, serde_json::json!({ "kind": "users", "userIds": ["u1"] }));
    }

    #[test]
    fn test_skip_email_mirror_flag() {
        let mut n = ServerNotification {
            id: "n1".into(),
            kind: NotificationType::System,
            title: "t".into(),
            message: "m".into(),
            data: Some(serde_json::json!({ "skipEmailMirror": true })),
            recipients: Recipients::All,
            read_by: BTreeSet::new(),
            created_at: Utc::now(),
        };
        assert!(n.skips_email_mirror());
        n.data = Some(serde_json::json!({ "daoId": "x" }));
        assert!(!n.skips_email_mirror());
        n.data = None;
        assert!(!n.skips_email_mirror());
    }
}
