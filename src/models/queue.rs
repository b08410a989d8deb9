//! Queues and their derived numbers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoChatSetting {
    Required,
    Optional,
    Disabled,
}

impl Default for VideoChatSetting {
    fn default() -> Self {
        VideoChatSetting::Disabled
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Queue {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub active: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub estimated_wait_time: i64,
    #[serde(default)]
    pub questions_active: i64,
    #[serde(default)]
    pub questions_asked: i64,
    #[serde(default)]
    pub video_chat_setting: VideoChatSetting,
    #[serde(default)]
    pub rate_limit_enabled: bool,
    #[serde(default)]
    pub rate_limit_length: Option<i64>,
    #[serde(default)]
    pub rate_limit_questions: Option<i64>,
    #[serde(default)]
    pub rate_limit_minutes: Option<i64>,
}

/// Rate-limit quota standing for the current student.
// wire format keeps these two snake_case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaCount {
    pub count: i64,
    pub wait_time_mins: i64,
}

/// A student question's rank on the queue; -1 while unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuePosition {
    pub position: i64,
}
