//! Data models for queue entities.
//!
//! This module contains the data structures the bindings deserialize cached
//! values into:
//!
//! - `Question`, `QuestionStatus`, `Tag`: queue questions and their lifecycle
//! - `Queue`, `QuotaCount`, `QueuePosition`: queues and their derived numbers
//! - `Course`, `Membership`, `User`, `Announcement`: course-level entities
//!
//! Field naming follows the server's wire format (camelCase, with the
//! documented snake_case exceptions kept as-is).

pub mod course;
pub mod question;
pub mod queue;

pub use course::{Announcement, Course, Kind, Membership, MembershipInvite, Semester, User};
pub use question::{Question, QuestionStatus, Tag};
pub use queue::{Queue, QueuePosition, QuotaCount, VideoChatSetting};
