//! Typed course data bindings.
//!
//! One constructor per entity the application consumes, plus the derived
//! queue views (quota, position, last-answered). Keys are the server's
//! canonical paths; descriptors name the entity kind and the filter the
//! server scopes push events by.
//!
//! Derived views follow one rule: when the serialized value of their
//! upstream binding changes, they issue a real fetch for the derived
//! endpoint. A local-only notification would serve whatever optimistic or
//! stale value happens to be cached, so it is never used here. Deep
//! equality of the serialized upstream value suppresses redundant fetches
//! when an event fires but nothing actually changed.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::config::{
    ANNOUNCEMENTS_POLL_INTERVAL, QUEUE_STATUS_POLL_INTERVAL, STAFF_QUESTION_POLL_INTERVAL,
    STUDENT_QUESTION_POS_POLL_INTERVAL, STUDENT_QUOTA_POLL_INTERVAL,
};
use crate::models::{Announcement, Course, Question, Queue, QueuePosition, QuotaCount};
use crate::sync::{
    Descriptor, ListConfig, ListenerGuard, Resource, ResourceConfig, ResourceList, SyncClient,
    SyncError,
};

fn course_key(course_id: i64) -> String {
    format!("/api/courses/{}/", course_id)
}

fn queue_key(course_id: i64, queue_id: i64) -> String {
    format!("/api/courses/{}/queues/{}/", course_id, queue_id)
}

fn questions_key(course_id: i64, queue_id: i64) -> String {
    format!("/api/courses/{}/queues/{}/questions/", course_id, queue_id)
}

/// Revalidate `downstream_key` whenever the serialized value of the
/// upstream key actually changes. The guard carries the subscription.
fn refetch_on_upstream_change(
    client: &SyncClient,
    upstream_key: &str,
    downstream_key: String,
) -> ListenerGuard {
    let store = Arc::clone(client.store());
    let fetcher = Arc::clone(client.fetcher());
    let last_serialized = Mutex::new(store.get(upstream_key).value.map(|v| v.to_string()));

    client.store().on_change(upstream_key, move |entry| {
        let serialized = entry.value.as_ref().map(|v| v.to_string());
        {
            let mut last = last_serialized.lock().unwrap();
            if *last == serialized {
                return;
            }
            *last = serialized;
        }
        debug!(upstream = %entry.key, downstream = %downstream_key, "upstream changed, refetching derived value");
        let store = Arc::clone(&store);
        let fetcher = Arc::clone(&fetcher);
        let key = downstream_key.clone();
        tokio::spawn(async move {
            if let Err(error) = store.revalidate(&key, &fetcher).await {
                debug!(key = %key, error = %error, "derived refetch failed");
            }
        });
    })
}

/// The course itself.
pub fn course(client: &SyncClient, course_id: i64, initial: Option<Course>) -> Resource<Course> {
    client.resource(course_key(course_id), initial, ResourceConfig::default())
}

/// All queues of a course, polled while any view is open (status changes
/// matter even in background tabs).
pub fn queues(
    client: &SyncClient,
    course_id: i64,
    initial: Option<Vec<Queue>>,
) -> ResourceList<Queue> {
    client.resource_list(
        format!("/api/courses/{}/queues/", course_id),
        move |id| format!("/api/courses/{}/queues/{}/", course_id, id),
        initial,
        ListConfig {
            refresh_interval: Some(QUEUE_STATUS_POLL_INTERVAL),
            refresh_when_hidden: true,
            order_by: None,
        },
    )
}

/// Course announcements, polled.
pub fn announcements(
    client: &SyncClient,
    course_id: i64,
    initial: Option<Vec<Announcement>>,
) -> ResourceList<Announcement> {
    client.resource_list(
        format!("/api/courses/{}/announcements/", course_id),
        move |id| format!("/api/courses/{}/announcements/{}/", course_id, id),
        initial,
        ListConfig {
            refresh_interval: Some(ANNOUNCEMENTS_POLL_INTERVAL),
            refresh_when_hidden: true,
            order_by: None,
        },
    )
}

fn questions_list(
    client: &SyncClient,
    course_id: i64,
    queue_id: i64,
    initial: Option<Vec<Question>>,
    refresh_interval: Option<std::time::Duration>,
) -> ResourceList<Question> {
    client.realtime_resource_list(
        questions_key(course_id, queue_id),
        move |id| format!("/api/courses/{}/queues/{}/questions/{}/", course_id, queue_id, id),
        Descriptor::new("Question", "queue_id", queue_id),
        initial,
        ListConfig {
            refresh_interval,
            refresh_when_hidden: true,
            order_by: Some(Arc::new(|a: &Question, b: &Question| {
                a.time_asked.cmp(&b.time_asked)
            })),
        },
    )
}

/// The live question list of a queue: realtime, polled as a fallback,
/// ordered by time asked.
pub struct Questions {
    list: ResourceList<Question>,
}

impl Questions {
    /// Open questions only (asked or being answered), in ask order.
    pub fn current(&self) -> Vec<Question> {
        self.list
            .current()
            .into_iter()
            .filter(|question| question.status.is_open())
            .collect()
    }

    /// Every question the collection holds, including terminal ones.
    pub fn all(&self) -> Vec<Question> {
        self.list.current()
    }

    /// The underlying binding, for mutation and subscription.
    pub fn list(&self) -> &ResourceList<Question> {
        &self.list
    }
}

pub fn questions(
    client: &SyncClient,
    course_id: i64,
    queue_id: i64,
    initial: Option<Vec<Question>>,
) -> Questions {
    Questions {
        list: questions_list(
            client,
            course_id,
            queue_id,
            initial,
            Some(STAFF_QUESTION_POLL_INTERVAL),
        ),
    }
}

/// Rate-limit quota view for a queue with rate limiting turned on.
///
/// Combines the realtime question list with a polled quota endpoint; any
/// real change to the question list refetches the quota.
pub struct QueueQuota {
    questions: ResourceList<Question>,
    quota: Resource<QuotaCount>,
    _trigger: ListenerGuard,
}

impl QueueQuota {
    /// Current standing; `None` until the quota endpoint has resolved.
    pub fn data(&self) -> Option<QuotaCount> {
        self.quota.data()
    }

    /// Like [`QueueQuota::data`], but names the pending upstream.
    pub fn try_data(&self) -> Result<QuotaCount, SyncError> {
        self.quota
            .data()
            .ok_or_else(|| SyncError::DerivedPending(self.quota.key().to_string()))
    }

    pub fn questions(&self) -> &ResourceList<Question> {
        &self.questions
    }
}

pub fn queue_quota(client: &SyncClient, course_id: i64, queue_id: i64) -> QueueQuota {
    let questions = questions_list(client, course_id, queue_id, None, None);
    let quota = client.resource(
        format!(
            "/api/courses/{}/queues/{}/questions/quota_count/",
            course_id, queue_id
        ),
        None,
        ResourceConfig {
            refresh_interval: Some(STUDENT_QUOTA_POLL_INTERVAL),
            refresh_when_hidden: true,
        },
    );
    let trigger = refetch_on_upstream_change(
        client,
        questions.collection_key(),
        quota.key().to_string(),
    );
    QueueQuota {
        questions,
        quota,
        _trigger: trigger,
    }
}

/// A student question's rank on the queue.
///
/// The parent queue is watched in realtime; any real change to it refetches
/// the position endpoint, which is also polled as a fallback.
pub struct QuestionPosition {
    queue: Resource<Queue>,
    position: Resource<QueuePosition>,
    _trigger: ListenerGuard,
}

impl QuestionPosition {
    /// Rank on the queue; -1 until the server has assigned one.
    pub fn position(&self) -> i64 {
        self.position.data().map(|p| p.position).unwrap_or(-1)
    }

    pub fn data(&self) -> Option<QueuePosition> {
        self.position.data()
    }

    pub fn queue(&self) -> &Resource<Queue> {
        &self.queue
    }
}

pub fn question_position(
    client: &SyncClient,
    course_id: i64,
    queue_id: i64,
    question_id: i64,
) -> QuestionPosition {
    let queue = client.realtime_resource(
        queue_key(course_id, queue_id),
        Descriptor::new("Queue", "id", queue_id),
        None,
        ResourceConfig::default(),
    );
    let position = client.resource(
        format!(
            "/api/courses/{}/queues/{}/questions/{}/position/",
            course_id, queue_id, question_id
        ),
        Some(QueuePosition { position: -1 }),
        ResourceConfig {
            refresh_interval: Some(STUDENT_QUESTION_POS_POLL_INTERVAL),
            refresh_when_hidden: false,
        },
    );
    let trigger = refetch_on_upstream_change(client, queue.key(), position.key().to_string());
    QuestionPosition {
        queue,
        position,
        _trigger: trigger,
    }
}

/// A student's most recently answered questions on a queue.
pub struct LastQuestions {
    questions: ResourceList<Question>,
    last: ResourceList<Question>,
    _trigger: ListenerGuard,
}

impl LastQuestions {
    pub fn data(&self) -> Vec<Question> {
        self.last.current()
    }

    pub fn last(&self) -> &ResourceList<Question> {
        &self.last
    }

    pub fn questions(&self) -> &ResourceList<Question> {
        &self.questions
    }
}

pub fn last_questions(client: &SyncClient, course_id: i64, queue_id: i64) -> LastQuestions {
    let questions = questions_list(client, course_id, queue_id, None, None);
    let last = client.resource_list(
        format!("/api/courses/{}/queues/{}/questions/last/", course_id, queue_id),
        move |id| format!("/api/courses/{}/queues/{}/questions/last/{}/", course_id, queue_id, id),
        None,
        ListConfig::default(),
    );
    let trigger = refetch_on_upstream_change(
        client,
        questions.collection_key(),
        last.collection_key().to_string(),
    );
    LastQuestions {
        questions,
        last,
        _trigger: trigger,
    }
}
