//! API client for communicating with the Oriens REST API.
//!
//! This module provides the `ApiClient` struct for making authenticated
//! requests for ledger entries, tags, preferences and projects.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::models::{
    EntryId, EntryQuery, LedgerRecord, Objective, ObjectiveId, Page, PreferencePatch,
    PreferenceRecord, Project, ProjectId, TagId, TagRecord,
};

use super::{ApiError, LedgerRemote, PreferenceRemote, ProjectRemote};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) GET requests.
/// Writes are never retried; their failure path is a rollback.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for Oriens, bound to one user.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<String>,
    token: Option<Arc<String>>,
    user_id: i64,
}

impl ApiClient {
    /// Create a new API client for `user_id` against `base_url`
    pub fn new(base_url: &str, user_id: i64, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: Arc::new(base_url.trim_end_matches('/').to_string()),
            token: None,
            user_id,
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(Arc::new(token.into()));
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: Arc<String>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: Arc::clone(&self.base_url),
            token: Some(token),
            user_id: self.user_id,
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    // ===== URL builders =====

    fn entries_url(&self) -> String {
        format!("{}/financial/user/{}/entries", self.base_url, self.user_id)
    }

    fn entry_url(&self, id: EntryId) -> String {
        format!("{}/{}", self.entries_url(), id)
    }

    fn tags_url(&self) -> String {
        format!("{}/financial/user/{}/tags", self.base_url, self.user_id)
    }

    fn tag_url(&self, id: TagId) -> String {
        format!("{}/{}", self.tags_url(), id)
    }

    fn preferences_url(&self) -> String {
        format!("{}/user/{}/preferences", self.base_url, self.user_id)
    }

    fn project_url(&self, id: ProjectId) -> String {
        format!("{}/project/{}", self.base_url, id)
    }

    fn objective_url(&self, project: ProjectId, objective: ObjectiveId) -> String {
        format!("{}/objective/{}", self.project_url(project), objective)
    }

    // ===== Request plumbing =====

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "application/json");
        match self.token {
            Some(ref token) => builder.bearer_auth(token.as_str()),
            None => builder,
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status.as_u16(), &body))
        }
    }

    async fn send(builder: RequestBuilder, url: &str) -> Result<reqwest::Response, ApiError> {
        let response = builder.send().await.map_err(|e| {
            debug!(url = url, error = %e, "Request failed before a response");
            ApiError::from(e)
        })?;
        Self::check_response(response).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let builder = self.request(Method::GET, url).query(params);
            match Self::send(builder, url).await {
                Ok(response) => return response.json().await.map_err(ApiError::from),
                Err(ApiError::RateLimited) => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(
                        url = url,
                        retry = retries,
                        backoff_ms = backoff_ms,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let builder = self.request(method, url).json(body);
        let response = Self::send(builder, url).await?;
        response.json().await.map_err(ApiError::from)
    }

    async fn delete(&self, url: &str) -> Result<reqwest::Response, ApiError> {
        Self::send(self.request(Method::DELETE, url), url).await
    }
}

#[async_trait]
impl LedgerRemote for ApiClient {
    async fn list_entries(&self, query: &EntryQuery) -> Result<Page<LedgerRecord>, ApiError> {
        debug!(page = query.page, size = query.size, "Listing entries");
        self.get(&self.entries_url(), &query.to_params()).await
    }

    async fn create_entry(&self, record: &LedgerRecord) -> Result<LedgerRecord, ApiError> {
        self.send_json(Method::POST, &self.entries_url(), record).await
    }

    async fn update_entry(
        &self,
        id: EntryId,
        record: &LedgerRecord,
    ) -> Result<LedgerRecord, ApiError> {
        self.send_json(Method::PUT, &self.entry_url(id), record).await
    }

    async fn delete_entry(&self, id: EntryId) -> Result<(), ApiError> {
        self.delete(&self.entry_url(id)).await?;
        Ok(())
    }

    async fn count_entries(&self) -> Result<u64, ApiError> {
        self.get(&format!("{}/count", self.entries_url()), &[]).await
    }

    async fn recurring_entries(&self) -> Result<Vec<LedgerRecord>, ApiError> {
        self.get(&format!("{}/recurring", self.entries_url()), &[]).await
    }

    async fn list_tags(&self) -> Result<Vec<TagRecord>, ApiError> {
        self.get(&self.tags_url(), &[]).await
    }

    async fn create_tag(&self, tag: &TagRecord) -> Result<TagRecord, ApiError> {
        self.send_json(Method::POST, &self.tags_url(), tag).await
    }

    async fn update_tag(&self, id: TagId, tag: &TagRecord) -> Result<TagRecord, ApiError> {
        self.send_json(Method::PUT, &self.tag_url(id), tag).await
    }

    async fn delete_tag(&self, id: TagId) -> Result<(), ApiError> {
        self.delete(&self.tag_url(id)).await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceRemote for ApiClient {
    async fn get_preferences(&self) -> Result<PreferenceRecord, ApiError> {
        self.get(&self.preferences_url(), &[]).await
    }

    async fn patch_preferences(
        &self,
        patch: &PreferencePatch,
    ) -> Result<PreferenceRecord, ApiError> {
        self.send_json(Method::PATCH, &self.preferences_url(), patch).await
    }
}

#[async_trait]
impl ProjectRemote for ApiClient {
    async fn get_project(&self, id: ProjectId) -> Result<Project, ApiError> {
        self.get(&self.project_url(id), &[]).await
    }

    async fn add_objective(
        &self,
        project: ProjectId,
        objective: &Objective,
    ) -> Result<Project, ApiError> {
        let url = format!("{}/objective", self.project_url(project));
        self.send_json(Method::POST, &url, objective).await
    }

    async fn update_objective(
        &self,
        project: ProjectId,
        objective: &Objective,
    ) -> Result<Project, ApiError> {
        let url = self.objective_url(project, objective.id);
        self.send_json(Method::PUT, &url, objective).await
    }

    async fn delete_objective(
        &self,
        project: ProjectId,
        objective: ObjectiveId,
    ) -> Result<Project, ApiError> {
        let url = self.objective_url(project, objective);
        let response = self.delete(&url).await?;
        response.json().await.map_err(ApiError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn client() -> ApiClient {
        ApiClient::new("http://localhost:8080/", 7, REQUEST_TIMEOUT_SECS).unwrap()
    }

    #[test]
    fn test_urls_are_scoped_to_user() {
        let api = client();
        assert_eq!(api.entries_url(), "http://localhost:8080/financial/user/7/entries");
        assert_eq!(api.entry_url(3), "http://localhost:8080/financial/user/7/entries/3");
        assert_eq!(api.tag_url(9), "http://localhost:8080/financial/user/7/tags/9");
        assert_eq!(api.preferences_url(), "http://localhost:8080/user/7/preferences");
    }

    #[test]
    fn test_objective_url_uses_stable_id() {
        let api = client();
        let id = ObjectiveId(Uuid::nil());
        assert_eq!(
            api.objective_url(12, id),
            "http://localhost:8080/project/12/objective/00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_with_token_keeps_user_and_base() {
        let api = client().with_token(Arc::new("abc".to_string()));
        assert_eq!(api.user_id(), 7);
        assert_eq!(api.token.as_deref().map(String::as_str), Some("abc"));
        assert_eq!(api.base_url.as_str(), "http://localhost:8080");
    }
}
