//! Outbound REST requests and the sinks that execute them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{ClientConfig, SyncError};

/// HTTP method of a REST request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestMethod {
    Patch,
}

impl RestMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            RestMethod::Patch => reqwest::Method::PATCH,
        }
    }
}

/// REST resources the mirror writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestEndpoint {
    /// `/channels/{channel.id}`
    Channel,
    /// `/guilds/{guild.id}`
    Server,
}

impl RestEndpoint {
    /// Path template; each `{}` is replaced by one url parameter in order.
    pub fn template(self) -> &'static str {
        match self {
            RestEndpoint::Channel => "/channels/{}",
            RestEndpoint::Server => "/guilds/{}",
        }
    }
}

/// One request handed to a [`RequestSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: RestMethod,
    pub endpoint: RestEndpoint,
    pub url_params: Vec<String>,
    pub body: Option<Value>,
    /// Human-readable reason recorded in the server's audit log.
    pub audit_reason: Option<String>,
}

impl RestRequest {
    pub fn new(method: RestMethod, endpoint: RestEndpoint) -> Self {
        Self {
            method,
            endpoint,
            url_params: Vec::new(),
            body: None,
            audit_reason: None,
        }
    }

    pub fn with_url_param(mut self, param: impl Into<String>) -> Self {
        self.url_params.push(param.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_audit_reason(mut self, reason: Option<String>) -> Self {
        self.audit_reason = reason;
        self
    }

    /// Endpoint path with url parameters substituted positionally.
    ///
    /// Placeholders without a matching parameter are left as `{}`.
    pub fn path(&self) -> String {
        let mut params = self.url_params.iter();
        let mut path = String::new();
        let mut parts = self.endpoint.template().split("{}").peekable();
        while let Some(part) = parts.next() {
            path.push_str(part);
            if parts.peek().is_some() {
                match params.next() {
                    Some(param) => path.push_str(param),
                    None => path.push_str("{}"),
                }
            }
        }
        path
    }
}

/// Executes outbound requests.
///
/// The core only needs to know whether a request succeeded; response
/// payloads are discarded. Implementations own timeouts, retries and
/// cancellation.
#[async_trait]
pub trait RequestSink: Send + Sync {
    async fn execute(&self, request: RestRequest) -> Result<(), SyncError>;
}

/// Request sink backed by the REST API over HTTP.
pub struct HttpSink {
    http: Client,
    config: ClientConfig,
}

impl HttpSink {
    /// Create a sink from a validated configuration.
    pub fn new(config: ClientConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Map a response to the sink's outcome.
    async fn handle_response(response: reqwest::Response) -> Result<(), SyncError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(SyncError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let text = response.text().await.map_err(|e| {
                SyncError::InvalidResponse(format!(
                    "request failed ({}): failed to read response: {}",
                    status, e
                ))
            })?;

            if let Ok(api_error) = serde_json::from_str::<ApiErrorBody>(&text) {
                return Err(SyncError::Api {
                    status: status.as_u16(),
                    code: api_error.code,
                    message: api_error.message,
                });
            }

            return Err(SyncError::InvalidResponse(format!(
                "request failed ({}): {}",
                status, text
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl RequestSink for HttpSink {
    async fn execute(&self, request: RestRequest) -> Result<(), SyncError> {
        let url = format!("{}{}", self.config.base_url(), request.path());
        debug!(method = ?request.method, url = %url, "sending request");

        let mut builder = self.http.request(request.method.as_reqwest(), &url);
        if let Some(token) = &self.config.token {
            builder = builder.header("Authorization", format!("Bot {}", token));
        }
        if let Some(reason) = &request.audit_reason {
            builder = builder.header("X-Audit-Log-Reason", reason.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let result = Self::handle_response(response).await;
        if let Err(e) = &result {
            warn!(method = ?request.method, url = %url, error = %e, "request failed");
        }
        result
    }
}

/// Error body returned by the REST API.
#[derive(Debug, serde::Deserialize)]
struct ApiErrorBody {
    code: i64,
    message: String,
}
