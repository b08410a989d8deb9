//! Tuning constants for the synchronization engine.
//!
//! Poll intervals mirror the cadence the queue UI needs: queue status and
//! staff question lists refresh aggressively while a session is open;
//! announcement and quota refreshes are slower. All of these are fallbacks
//! behind the push channel - realtime events trigger refreshes sooner.

use std::time::Duration;

/// Queue status (open/closed, wait time) poll interval.
pub const QUEUE_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Staff-facing question list poll interval.
pub const STAFF_QUESTION_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Student question position poll interval.
pub const STUDENT_QUESTION_POS_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Student quota/wait-time poll interval.
pub const STUDENT_QUOTA_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Course announcements poll interval.
pub const ANNOUNCEMENTS_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
