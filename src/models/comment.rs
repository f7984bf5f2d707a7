//! Comment model for DAO and task discussions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub dao_id: String,
    /// Set when the comment is attached to a task rather than the whole DAO.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<u32>,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Request body for posting a comment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    #[serde(default)]
    pub task_id: Option<u32>,
    pub content: String,
}
