//! HTTP client for the Queueline REST API.
//!
//! Reads are served through the [`Fetcher`] implementation: the
//! synchronization engine hands a resource key (a canonical path) to
//! `fetch`, which GETs it and parses the JSON body. Writes are explicit
//! methods; revalidation of affected cache entries is the caller's business
//! (usually via `mutate` on the owning binding).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::REQUEST_TIMEOUT_SECS;
use crate::models::{Announcement, Question, QuestionStatus, Queue};
use crate::sync::Fetcher;

use super::FetchError;

/// API client for the Queueline server.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<String>,
    token: Option<Arc<String>>,
}

impl ApiClient {
    /// Create a new API client against `base_url` (scheme + host, no
    /// trailing slash required).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url: Arc::new(base_url),
            token: None,
        })
    }

    /// Create a new ApiClient with the given token, sharing the connection
    /// pool.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: Arc::clone(&self.base_url),
            token: Some(Arc::new(token.into())),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.client.request(method, self.url(path));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(FetchError::from_status(status, &body))
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let mut builder = self.request(method.clone(), path);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to {}", method, path))?;
        let response = Self::check_response(response).await?;

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse JSON response from {}", path))
    }

    // =========================================================================
    // Write operations
    // =========================================================================

    /// Ask a question on a queue.
    pub async fn create_question(
        &self,
        course_id: i64,
        queue_id: i64,
        text: &str,
        tag_ids: &[i64],
    ) -> Result<Question> {
        let path = format!("/api/courses/{}/queues/{}/questions/", course_id, queue_id);
        let payload = json!({"text": text, "tags": tag_ids});
        let question: Question = self.send_json(Method::POST, &path, Some(&payload)).await?;
        debug!(question = question.id, queue = queue_id, "question created");
        Ok(question)
    }

    /// Patch a question (status transitions, text edits).
    pub async fn update_question(
        &self,
        course_id: i64,
        queue_id: i64,
        question_id: i64,
        patch: &Value,
    ) -> Result<Question> {
        let path = format!(
            "/api/courses/{}/queues/{}/questions/{}/",
            course_id, queue_id, question_id
        );
        self.send_json(Method::PATCH, &path, Some(patch)).await
    }

    /// Mark a question answered.
    pub async fn finish_question(
        &self,
        course_id: i64,
        queue_id: i64,
        question_id: i64,
    ) -> Result<Question> {
        let patch = json!({"status": QuestionStatus::Answered});
        self.update_question(course_id, queue_id, question_id, &patch)
            .await
    }

    /// Create a queue on a course.
    pub async fn create_queue(&self, course_id: i64, payload: &Value) -> Result<Queue> {
        let path = format!("/api/courses/{}/queues/", course_id);
        self.send_json(Method::POST, &path, Some(payload)).await
    }

    /// Reject every open question on a queue.
    pub async fn clear_queue(&self, course_id: i64, queue_id: i64) -> Result<()> {
        let path = format!("/api/courses/{}/queues/{}/clear/", course_id, queue_id);
        let _: Value = self.send_json(Method::POST, &path, None).await?;
        debug!(queue = queue_id, "queue cleared");
        Ok(())
    }

    /// Post a course announcement.
    pub async fn create_announcement(
        &self,
        course_id: i64,
        content: &str,
    ) -> Result<Announcement> {
        let path = format!("/api/courses/{}/announcements/", course_id);
        let payload = json!({"content": content});
        self.send_json(Method::POST, &path, Some(&payload)).await
    }
}

#[async_trait]
impl Fetcher for ApiClient {
    async fn fetch(&self, key: &str) -> Result<Value, FetchError> {
        let response = self
            .request(Method::GET, key)
            .send()
            .await
            .map_err(FetchError::from)?;
        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .map_err(|error| FetchError::Decode(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_key_onto_base() {
        let client = ApiClient::new("https://queue.example.edu").unwrap();
        assert_eq!(
            client.url("/api/courses/1/queues/"),
            "https://queue.example.edu/api/courses/1/queues/"
        );
    }

    #[test]
    fn test_trailing_slash_on_base_is_normalized() {
        let client = ApiClient::new("https://queue.example.edu/").unwrap();
        assert_eq!(client.url("/api/accounts/me/"), "https://queue.example.edu/api/accounts/me/");
    }

    #[test]
    fn test_with_token_preserves_base_url() {
        let client = ApiClient::new("https://queue.example.edu").unwrap();
        let authed = client.with_token("abc123");
        assert_eq!(authed.url("/x/"), "https://queue.example.edu/x/");
        assert!(authed.token.is_some());
        assert!(client.token.is_none());
    }
}
