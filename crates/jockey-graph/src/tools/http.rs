//! HTTP tool executor
//!
//! `POST {base_url}/tools/{tool}` with the arguments as the JSON body. The
//! response body is the tool result.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{ToolError, ToolExecutor};

/// Default timeout for one tool call
const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct HttpToolExecutor {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpToolExecutor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Send `x-api-key` with every call
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, tool: &str) -> String {
        format!("{}/tools/{}", self.base_url, tool)
    }
}

#[async_trait]
impl ToolExecutor for HttpToolExecutor {
    async fn invoke(&self, tool: &str, args: Value) -> Result<Value, ToolError> {
        debug!(tool, "Invoking tool");
        let mut request = self
            .client
            .post(self.endpoint(tool))
            .timeout(self.timeout)
            .json(&args);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::Timeout {
                    tool: tool.to_string(),
                }
            } else {
                ToolError::Transport {
                    tool: tool.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Status {
                tool: tool.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(|e| ToolError::InvalidResponse {
            tool: tool.to_string(),
            message: e.to_string(),
        })
    }
}
