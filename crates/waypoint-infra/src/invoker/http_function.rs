//! HttpFunctionInvoker -- compute-task invoker for remote functions.
//!
//! POSTs the task input as JSON to a configured endpoint and returns the
//! JSON response body as the task result. The resource identifier travels
//! in the `X-Waypoint-Resource` header so one endpoint can front several
//! functions.
//!
//! Status mapping:
//! - 2xx with JSON body -> result (an empty body is `null`)
//! - 2xx with an `X-Function-Error` header -> `FunctionError`
//! - 429 -> `Throttled`
//! - any other non-2xx -> `FunctionError`
//! - connect/send/read failures -> `Transport`

use reqwest::StatusCode;
use serde_json::Value;

use waypoint_core::workflow::invoker::{InvocationError, TaskInvoker};

use super::RESOURCE_HEADER;

/// Header a function endpoint sets when the function itself failed.
pub const FUNCTION_ERROR_HEADER: &str = "X-Function-Error";

/// Remote compute-function invoker.
pub struct HttpFunctionInvoker {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpFunctionInvoker {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    /// Share an existing client (connection pool) across invokers.
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl TaskInvoker for HttpFunctionInvoker {
    fn name(&self) -> &str {
        "http_function"
    }

    async fn invoke(&self, resource: &str, input: &Value) -> Result<Value, InvocationError> {
        let transport = |e: reqwest::Error| InvocationError::Transport {
            resource: resource.to_string(),
            reason: e.to_string(),
        };

        tracing::debug!(resource, endpoint = self.endpoint.as_str(), "invoking function");

        let response = self
            .client
            .post(&self.endpoint)
            .header(RESOURCE_HEADER, resource)
            .json(input)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let function_error = response
            .headers()
            .get(FUNCTION_ERROR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(transport)?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(InvocationError::Throttled {
                resource: resource.to_string(),
                reason: format!("HTTP {status}: {body}"),
            });
        }
        if !status.is_success() {
            return Err(InvocationError::FunctionError {
                resource: resource.to_string(),
                message: format!("HTTP {status}: {body}"),
            });
        }
        if let Some(kind) = function_error {
            return Err(InvocationError::FunctionError {
                resource: resource.to_string(),
                message: format!("{kind}: {body}"),
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| InvocationError::InvalidResponse {
            resource: resource.to_string(),
            reason: format!("response is not JSON: {e}"),
        })
    }
}
