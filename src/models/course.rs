//! Courses, memberships, and announcements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Role of a member within a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Kind {
    Professor,
    HeadTa,
    Ta,
    Student,
}

impl Kind {
    /// Professors and head TAs administer the course.
    pub fn is_leadership(&self) -> bool {
        matches!(self, Kind::Professor | Kind::HeadTa)
    }

    /// Anyone who answers questions.
    pub fn is_staff(&self) -> bool {
        !matches!(self, Kind::Student)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Semester {
    pub id: i64,
    pub term: String,
    pub year: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: i64,
    pub course_code: String,
    pub department: String,
    #[serde(default)]
    pub course_title: String,
    #[serde(default)]
    pub semester: Option<Semester>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub invite_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub id: i64,
    pub kind: Kind,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipInvite {
    pub id: i64,
    pub email: String,
    pub kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub id: i64,
    pub content: String,
    #[serde(default)]
    pub author: Option<User>,
    #[serde(default)]
    pub time_updated: Option<DateTime<Utc>>,
}
