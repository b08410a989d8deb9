//! Questions asked on a queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::course::User;

/// Lifecycle of a question.
///
/// `Asked` and `Active` are the open states shown on a live queue; the rest
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionStatus {
    Asked,
    Active,
    Rejected,
    Answered,
    Withdrawn,
}

impl QuestionStatus {
    /// Still on the live queue (waiting or being answered).
    pub fn is_open(&self) -> bool {
        matches!(self, QuestionStatus::Asked | QuestionStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: i64,
    pub text: String,
    pub status: QuestionStatus,
    pub time_asked: DateTime<Utc>,
    #[serde(default)]
    pub time_response_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_responded_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub asked_by: Option<User>,
    #[serde(default)]
    pub responded_to_by: Option<User>,
    #[serde(default)]
    pub video_chat_url: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}
