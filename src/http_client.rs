use anyhow::Context;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::CredentialStore;
use crate::error::{ApiError, Result};

/// HTTP client for the scheduling backend
///
/// Attaches the stored credential as a bearer token and clears it when the
/// backend answers 401. Never retries; every failure goes back to the caller.
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Resolved base address, e.g. `https://school.example/api`
    base_url: String,

    /// Credential source for the Authorization header
    credentials: Arc<dyn CredentialStore>,
}

impl ApiClient {
    /// Create a new client
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialStore>,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ApiError::Config("API base URL is empty".to_string()));
        }

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Build a request with the JSON and bearer headers applied
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, self.url(path))
            .header("Content-Type", "application/json");

        if let Some(token) = self.credentials.get() {
            builder = builder.bearer_auth(token);
        }

        builder
    }

    /// Send a request and classify the outcome
    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build().context("Failed to build request")?;
        let method = request.method().clone();
        let url = request.url().clone();

        tracing::debug!(method = %method, url = %url, "Sending HTTP request");

        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                let err = ApiError::from_transport(&e);
                tracing::warn!(url = %url, error = %e, "HTTP request error");
                return Err(err);
            }
        };

        let status = response.status();
        tracing::debug!(status = %status, "Received HTTP response");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(url = %url, "Received 401, clearing stored credential");
            self.credentials.clear();
            return Err(ApiError::AuthorizationDenied(body));
        }

        tracing::warn!(
            status = status.as_u16(),
            url = %url,
            response_body = %body,
            "HTTP request failed with error response"
        );
        Err(ApiError::Status {
            status: status.as_u16(),
            message: body,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::from_transport(&e))?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.request(Method::GET, path)).await?;
        Self::decode(response).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.send(self.request(Method::POST, path).json(body)).await?;
        Self::decode(response).await
    }

    pub async fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.send(self.request(Method::PUT, path).json(body)).await?;
        Self::decode(response).await
    }
}
