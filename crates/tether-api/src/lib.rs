//! # tether-api
//!
//! Plain request/response JSON helper for polling-style control-plane
//! fetches — one HTTP cycle per call, independent of the persistent link.
//!
//! [`ApiClient::request`] decodes a typed result; [`ApiClient::request_raw`]
//! returns the body as a string. Both treat a non-2xx status as an error
//! ([`ApiError::Status`] carries the status and body so callers can still
//! inspect what the control plane said).

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the plain request helper.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request could not be performed (connect, TLS, timeout).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The control plane answered with a non-2xx status.
    #[error("unexpected status {status}")]
    Status {
        /// Response status code.
        status: u16,
        /// Response body, for inspection.
        body: String,
    },

    /// The response body did not decode as the expected type.
    #[error("response decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// The method string was not a valid HTTP method.
    #[error("invalid method: {0}")]
    Method(String),
}

/// Result alias for API calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// One-shot JSON client bound to a base address.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client for the given base address.
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Create a client with a custom per-request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> ApiResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Perform one request/response cycle and decode a typed result.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        headers: Option<&HashMap<String, String>>,
        query: Option<&[(&str, &str)]>,
        body: Option<&Value>,
    ) -> ApiResult<T> {
        let text = self.request_raw(method, path, headers, query, body).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Perform one request/response cycle and return the raw body.
    pub async fn request_raw(
        &self,
        method: &str,
        path: &str,
        headers: Option<&HashMap<String, String>>,
        query: Option<&[(&str, &str)]>,
        body: Option<&Value>,
    ) -> ApiResult<String> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| ApiError::Method(method.to_owned()))?;
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        let mut request = self.http.request(method.clone(), &url);
        if let Some(headers) = headers {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }
        if let Some(query) = query {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(%method, %url, "api request");
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    /// Convenience GET with query parameters.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<&[(&str, &str)]>,
    ) -> ApiResult<T> {
        self.request("GET", path, None, query, None).await
    }

    /// Convenience POST with a JSON body.
    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> ApiResult<T> {
        self.request("POST", path, None, None, Some(body)).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
