//! HTTP client for the farm backend REST API.
//!
//! Reads (`fetch_*`) go through `ApiClient` directly. Queued mutations are
//! replayed through the `RemoteApi` trait so the sync engine can be driven by
//! a fake in tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::ApiError;
use crate::models::{Checkup, Task, Vaccination, Veterinarian};
use crate::queue::HttpMethod;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds. A timed-out request counts as a failure.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Maximum number of retries for rate-limited (429) reads.
const MAX_RATE_LIMIT_RETRIES: u32 = 2;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// List endpoints answer either with a bare array or with `{ "data": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListResponse<T> {
    Bare(Vec<T>),
    Wrapped { data: Vec<T> },
}

impl<T> ListResponse<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListResponse::Bare(items) => items,
            ListResponse::Wrapped { data } => data,
        }
    }
}

/// Executes one HTTP request on behalf of the sync engine.
///
/// `Ok(())` means the server answered 2xx. Every other outcome, including
/// transport failures, is an `ApiError`.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn execute(
        &self,
        method: HttpMethod,
        url: &str,
        token: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<(), ApiError>;
}

/// API client for the farm backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(api_base: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(api_base, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(api_base: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            api_base: self.api_base.clone(),
            token: Some(token),
        }
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.api_base, endpoint)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, ApiError> {
        let token = self.token.as_deref().ok_or(ApiError::MissingToken)?;
        let url = self.url(endpoint);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(&url)
                .bearer_auth(token)
                .query(query)
                .send()
                .await?;

            match Self::check_response(response).await {
                Ok(response) => {
                    let text = response.text().await?;
                    let parsed: ListResponse<T> = serde_json::from_str(&text).map_err(|e| {
                        ApiError::InvalidResponse(format!("{} from {}", e, endpoint))
                    })?;
                    let items = parsed.into_vec();
                    debug!(endpoint = endpoint, count = items.len(), "Fetched list");
                    return Ok(items);
                }
                Err(ApiError::RateLimited) if retries < MAX_RATE_LIMIT_RETRIES => {
                    retries += 1;
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ===== Data Fetching Methods =====

    pub async fn fetch_tasks(&self) -> Result<Vec<Task>, ApiError> {
        self.get_list("/tasks", &[]).await
    }

    pub async fn fetch_vaccinations(&self) -> Result<Vec<Vaccination>, ApiError> {
        self.get_list("/vaccinations", &[]).await
    }

    pub async fn fetch_checkups(&self) -> Result<Vec<Checkup>, ApiError> {
        self.get_list("/checkups", &[]).await
    }

    /// Vet directory filtered by city and animal type.
    pub async fn fetch_vets(
        &self,
        city: &str,
        animal_type: &str,
    ) -> Result<Vec<Veterinarian>, ApiError> {
        self.get_list("/vets", &[("city", city), ("animal_type", animal_type)])
            .await
    }
}

#[async_trait]
impl RemoteApi for ApiClient {
    async fn execute(
        &self,
        method: HttpMethod,
        url: &str,
        token: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<(), ApiError> {
        let mut request = self
            .client
            .request(method.as_reqwest(), url)
            .bearer_auth(token);
        if let Some(body) = payload {
            request = request.json(body);
        }

        let response = request.send().await?;
        Self::check_response(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use httpmock::Method::PATCH;
    use serde_json::json;

    #[tokio::test]
    async fn test_fetch_tasks_accepts_bare_and_wrapped_lists() {
        let server = MockServer::start_async().await;
        let bare = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/tasks")
                    .header("authorization", "Bearer tok");
                then.status(200)
                    .json_body(json!([{"id": "1", "task_name": "Feed"}]));
            })
            .await;

        let api = ApiClient::new(server.base_url()).unwrap().with_token("tok".into());
        let tasks = api.fetch_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_name, "Feed");
        bare.assert_async().await;

        let wrapped = server
            .mock_async(|when, then| {
                when.method(GET).path("/checkups");
                then.status(200).json_body(json!({"data": [{
                    "id": "c1",
                    "animal_name": "Bessie",
                    "scheduled_at": "2026-10-20T09:00:00Z"
                }]}));
            })
            .await;
        let checkups = api.fetch_checkups().await.unwrap();
        assert_eq!(checkups[0].animal_name, "Bessie");
        wrapped.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_vets_sends_query() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/vets")
                    .query_param("city", "Eldoret")
                    .query_param("animal_type", "poultry");
                then.status(200).json_body(json!([]));
            })
            .await;

        let api = ApiClient::new(server.base_url()).unwrap().with_token("tok".into());
        assert!(api.fetch_vets("Eldoret", "poultry").await.unwrap().is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_without_token_fails_fast() {
        let api = ApiClient::new("http://127.0.0.1:9").unwrap();
        assert!(matches!(api.fetch_tasks().await, Err(ApiError::MissingToken)));
    }

    #[tokio::test]
    async fn test_execute_sends_bearer_and_json() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/tasks/5")
                    .header("authorization", "Bearer abc")
                    .json_body(json!({"status": "completed"}));
                then.status(204);
            })
            .await;

        let api = ApiClient::new(server.base_url()).unwrap();
        let payload = json!({"status": "completed"});
        api.execute(HttpMethod::Patch, &api.url("/tasks/5"), "abc", Some(&payload))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_execute_maps_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/checkups/1");
                then.status(500).body("boom");
            })
            .await;

        let api = ApiClient::new(server.base_url()).unwrap();
        let result = api
            .execute(HttpMethod::Delete, &api.url("/checkups/1"), "abc", None)
            .await;
        assert!(matches!(result, Err(ApiError::ServerError(_))));
    }

    #[test]
    fn test_api_base_trailing_slash_is_trimmed() {
        let api = ApiClient::new("https://farm.example/api/").unwrap();
        assert_eq!(api.url("/tasks"), "https://farm.example/api/tasks");
    }
}
