//! Remote provider over a JSON HTTP API.
//!
//! The endpoint is expected to expose:
//!
//! - `POST   {endpoint}/v1/resources`        create
//! - `POST   {endpoint}/v1/resources/read`   read an existing resource
//! - `PUT    {endpoint}/v1/resources/{id}`   update
//! - `DELETE {endpoint}/v1/resources/{id}`   delete
//!
//! Requests and responses use the camelCase JSON form of
//! [`ProviderRequest`], [`ProviderResponse`] and [`DeleteRequest`].

use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::{HalldyllError, ProviderError, Result};
use crate::graph::ResourceId;

use super::{DeleteRequest, Provider, ProviderRequest, ProviderResponse, ProviderResult};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of attempts for transient failures.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between retries.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Provider backed by a remote HTTP API.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpProvider {
    /// Creates a provider for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid base URL or the HTTP
    /// client cannot be created.
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self> {
        Self::with_timeout(endpoint, api_key, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a provider with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid base URL or the HTTP
    /// client cannot be created.
    pub fn with_timeout(endpoint: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| HalldyllError::internal(format!("Invalid provider endpoint '{endpoint}': {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(HalldyllError::internal(format!(
                "Provider endpoint '{endpoint}' cannot be used as a base URL"
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| HalldyllError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Sets the retry policy for transient failures.
    #[must_use]
    pub const fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = if max_retries == 0 { 1 } else { max_retries };
        self.retry_delay = retry_delay;
        self
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("v1").push("resources").extend(segments);
        }
        url
    }

    /// Sends a request, retrying transient failures.
    async fn execute<B: Serialize + Sync + ?Sized>(
        &self,
        id: &ResourceId,
        method: Method,
        url: Url,
        body: &B,
    ) -> ProviderResult<String> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..self.max_retries {
            if let Some(previous) = &last_error {
                let delay = self.backoff(previous, attempt);
                debug!("Retry attempt {attempt} of {} for {id} in {delay:?}", self.max_retries);
                tokio::time::sleep(delay).await;
            }

            match self.execute_once(id, method.clone(), url.clone(), body).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() => {
                    warn!("Transient provider failure: {e}");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::network(id, "Max retries exceeded")))
    }

    /// Delay before retry `attempt`. A `Retry-After` sent with a 429 takes
    /// precedence over the linear backoff.
    fn backoff(&self, error: &ProviderError, attempt: u32) -> Duration {
        error
            .retry_delay_secs()
            .map_or(self.retry_delay * attempt, Duration::from_secs)
    }

    async fn execute_once<B: Serialize + Sync + ?Sized>(
        &self,
        id: &ResourceId,
        method: Method,
        url: Url,
        body: &B,
    ) -> ProviderResult<String> {
        trace!("{method} {url}");

        let mut request = self
            .client
            .request(method, url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::network(id, format!("Request failed: {e}")))?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();

            return Err(ProviderError::RateLimited {
                id: id.clone(),
                retry_after_secs: retry_after,
            });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProviderError::AuthenticationFailed {
                id: id.clone(),
                message: String::from("Invalid API key"),
            });
        }

        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound { id: id.clone() });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::api_error(id, status.as_u16(), body));
        }

        response
            .text()
            .await
            .map_err(|e| ProviderError::network(id, format!("Failed to read response: {e}")))
    }

    fn parse_response(id: &ResourceId, body: &str) -> ProviderResult<ProviderResponse> {
        serde_json::from_str(body)
            .map_err(|e| ProviderError::invalid_response(id, format!("Failed to parse response: {e}")))
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn create(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        let body = self
            .execute(&request.id, Method::POST, self.url(&[]), request)
            .await?;
        Self::parse_response(&request.id, &body)
    }

    async fn read(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        let body = self
            .execute(&request.id, Method::POST, self.url(&["read"]), request)
            .await?;
        Self::parse_response(&request.id, &body)
    }

    async fn update(
        &self,
        provider_id: &str,
        request: &ProviderRequest,
    ) -> ProviderResult<ProviderResponse> {
        let body = self
            .execute(&request.id, Method::PUT, self.url(&[provider_id]), request)
            .await?;
        Self::parse_response(&request.id, &body)
    }

    async fn delete(&self, request: &DeleteRequest) -> ProviderResult<()> {
        match self
            .execute(
                &request.id,
                Method::DELETE,
                self.url(&[&request.provider_id]),
                request,
            )
            .await
        {
            Ok(_) | Err(ProviderError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DeclarationMode;
    use serde_json::json;
    use wiremock::matchers::{header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ProviderRequest {
        ProviderRequest {
            id: ResourceId::new("gcp:sql:User", "blackcandy/user"),
            properties: json!({ "name": "blackcandy" }),
            provider_config: None,
            mode: DeclarationMode::Managed,
        }
    }

    fn provider(server: &MockServer) -> HttpProvider {
        HttpProvider::new(&server.uri(), Some(String::from("token")))
            .expect("valid endpoint")
            .with_retries(3, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_create_sends_request_and_parses_outputs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/resources"))
            .and(header_matcher("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "providerId": "users/blackcandy",
                "outputs": { "name": "blackcandy" },
                "secretOutputs": ["password"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = provider(&server)
            .create(&request())
            .await
            .expect("create should succeed");

        assert_eq!(response.provider_id, "users/blackcandy");
        assert!(response.secret_outputs.contains("password"));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/resources"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .expect(3)
            .mount(&server)
            .await;

        let err = provider(&server)
            .create(&request())
            .await
            .expect_err("should fail after retries");

        assert!(matches!(err, ProviderError::ApiRequestFailed { status: 503, .. }));
        assert_eq!(err.id(), &request().id);
    }

    #[tokio::test]
    async fn test_rate_limit_waits_for_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/resources"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/resources"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "providerId": "users/blackcandy",
                "outputs": {}
            })))
            .expect(1)
            .mount(&server)
            .await;

        // The backoff alone would wait far longer than the server asked for.
        let provider = HttpProvider::new(&server.uri(), None)
            .expect("valid endpoint")
            .with_retries(2, Duration::from_secs(30));
        let started = std::time::Instant::now();
        let response = provider.create(&request()).await.expect("second attempt succeeds");

        assert_eq!(response.provider_id, "users/blackcandy");
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(1), "waited {waited:?}");
        assert!(waited < Duration::from_secs(10), "waited {waited:?}");
    }

    #[test]
    fn test_backoff_without_retry_after_is_linear() {
        let provider = HttpProvider::new("http://localhost:1", None)
            .expect("valid endpoint")
            .with_retries(3, Duration::from_millis(100));
        let id = request().id;
        let unspecified = ProviderError::RateLimited {
            id: id.clone(),
            retry_after_secs: 0,
        };

        assert_eq!(provider.backoff(&unspecified, 2), Duration::from_millis(200));
        assert_eq!(
            provider.backoff(&ProviderError::network(&id, "reset"), 1),
            Duration::from_millis(100)
        );
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/resources"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server)
            .create(&request())
            .await
            .expect_err("should fail");
        assert!(matches!(err, ProviderError::AuthenticationFailed { .. }));
    }

    #[tokio::test]
    async fn test_delete_of_missing_resource_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/resources/users%2Fblackcandy"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let delete = DeleteRequest {
            id: request().id,
            provider_id: String::from("users/blackcandy"),
            outputs: json!({}),
            provider_config: None,
        };
        provider(&server)
            .delete(&delete)
            .await
            .expect("missing resource counts as deleted");
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(HttpProvider::new("not a url", None).is_err());
    }
}
