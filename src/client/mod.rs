//! HTTP clients for the external collaborators: identity, appointment and
//! notification services.
//!
//! Each collaborator is a trait so the engine and the composition root can
//! run against the in-memory doubles in [`mock`]. The reqwest
//! implementations share one [`HttpTransport`]: a single connection pool and
//! cookie store, so the session cookie set by the identity service is sent
//! to the other services as well.
//!
//! Every non-2xx answer is a uniform [`ServiceError::Status`] carrying the
//! human-readable message from the `{"error": "..."}` body, or the
//! operation's default message when the body has none.

pub mod appointments;
pub mod identity;
pub mod mock;
pub mod notifications;

use serde::de::DeserializeOwned;

use crate::config::{ClientConfig, APP_NAME, APP_VERSION};

pub use appointments::{AppointmentService, HttpAppointmentService};
pub use identity::{HttpIdentityService, IdentityService};
pub use notifications::{HttpNotificationService, NotificationService};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("Service unreachable at {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

impl ServiceError {
    /// Whether retrying the same request later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Connection(_) | ServiceError::Timeout(_) => true,
            ServiceError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            ServiceError::ResponseParsing(_) | ServiceError::HttpClient(_) => false,
        }
    }

    /// The service rejected the caller's credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ServiceError::Status { status: 401 | 403, .. })
    }

    /// The message to show the user.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// HttpTransport
// ═══════════════════════════════════════════════════════════

/// Shared reqwest client with cookie store and configured timeouts.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(format!("{APP_NAME}/{APP_VERSION}"))
            .build()
            .map_err(|e| ServiceError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: config.request_timeout.as_secs(),
        })
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send a request and fail with [`ServiceError::Status`] on non-2xx.
    pub(crate) async fn send(
        &self,
        request: reqwest::RequestBuilder,
        fallback: &str,
    ) -> Result<reqwest::Response, ServiceError> {
        let response = request.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                message: error_message(&body, fallback),
            });
        }

        Ok(response)
    }

    /// Send a request and decode a JSON body.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        fallback: &str,
    ) -> Result<T, ServiceError> {
        let response = self.send(request, fallback).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::ResponseParsing(e.to_string()))
    }

    fn map_send_error(&self, e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            let target = e
                .url()
                .map(|u| u.origin().ascii_serialization())
                .unwrap_or_else(|| "unknown host".to_string());
            ServiceError::Connection(target)
        } else {
            ServiceError::HttpClient(e.to_string())
        }
    }
}

/// Build `base/seg1/seg2/...` with each segment percent-encoded.
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<reqwest::Url, ServiceError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| ServiceError::HttpClient(format!("Invalid base URL {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| ServiceError::HttpClient(format!("Base URL cannot be a base: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Extract the human-readable message from an error body.
///
/// Services answer `{"error": "..."}`; `{"error": {"message": "..."}}` and
/// `{"message": "..."}` are accepted as well. Anything else yields `fallback`.
fn error_message(body: &str, fallback: &str) -> String {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return fallback.to_string();
    };
    let candidate = match json.get("error") {
        Some(serde_json::Value::String(s)) => Some(s.as_str()),
        Some(obj) => obj.get("message").and_then(|m| m.as_str()),
        None => json.get("message").and_then(|m| m.as_str()),
    };
    candidate
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
        .to_string()
}
