//! Engine configuration types for Waypoint.
//!
//! `EngineConfig` represents the `waypoint.toml` that bounds executions
//! (step budget, task deadline, context size) and routes resource
//! identifiers to task invokers. All fields have sensible defaults.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of states a single execution may enter.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Default per-task deadline in seconds (a state's `TimeoutSeconds` wins).
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Optional deadline for a whole execution, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_timeout_secs: Option<u64>,

    /// Maximum serialized size of the execution context in bytes.
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,

    /// Resource-prefix routes to invoker implementations.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

fn default_max_steps() -> u32 {
    1000
}

fn default_task_timeout_secs() -> u64 {
    60
}

fn default_max_context_bytes() -> usize {
    10_485_760
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            task_timeout_secs: default_task_timeout_secs(),
            execution_timeout_secs: None,
            max_context_bytes: default_max_context_bytes(),
            routes: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 {
            return Err(ConfigError::Invalid("max_steps must be >= 1".to_string()));
        }
        if self.task_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "task_timeout_secs must be >= 1".to_string(),
            ));
        }
        if self.execution_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "execution_timeout_secs must be >= 1".to_string(),
            ));
        }
        if self.max_context_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_context_bytes must be >= 1".to_string(),
            ));
        }
        for route in &self.routes {
            route.validate()?;
        }
        Ok(())
    }
}

/// Routes every resource identifier starting with `prefix` to one invoker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Resource identifier prefix (longest match wins).
    pub prefix: String,
    /// Which invoker implementation handles the route.
    pub kind: InvokerKind,
    /// Endpoint URL. Required for `http_function`; the fallback webhook for
    /// `topic_webhook`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Per-topic webhook URLs for `topic_webhook`, keyed by topic identifier.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub topics: std::collections::BTreeMap<String, String>,
    /// Retry policy applied by the invoker registry for this route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl RouteConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() {
            return Err(ConfigError::Invalid("route prefix must not be empty".to_string()));
        }
        match self.kind {
            InvokerKind::HttpFunction if self.endpoint.is_none() => {
                return Err(ConfigError::Invalid(format!(
                    "route '{}': http_function requires an endpoint",
                    self.prefix
                )));
            }
            InvokerKind::TopicWebhook if self.endpoint.is_none() && self.topics.is_empty() => {
                return Err(ConfigError::Invalid(format!(
                    "route '{}': topic_webhook requires an endpoint or topics",
                    self.prefix
                )));
            }
            _ => {}
        }
        if let Some(retry) = &self.retry {
            retry.validate().map_err(|reason| {
                ConfigError::Invalid(format!("route '{}': {reason}", self.prefix))
            })?;
        }
        Ok(())
    }
}

/// Invoker implementations available to routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokerKind {
    /// POST the task input to a remote function endpoint.
    HttpFunction,
    /// Publish `TopicArn`/`Subject`/`Message` to a webhook.
    TopicWebhook,
}

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// Retry policy for one invoker route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds (default 1000).
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Multiplier applied to the delay after each retry (default 2.0).
    #[serde(default = "default_backoff_rate")]
    pub backoff_rate: f64,
    /// Upper bound on a single delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_interval_ms: Option<u64>,
    /// Which failures are retried (default: transport and throttling).
    #[serde(default = "default_retry_on")]
    pub retry_on: Vec<RetryOn>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_backoff_rate() -> f64 {
    2.0
}

fn default_retry_on() -> Vec<RetryOn> {
    vec![RetryOn::Transport, RetryOn::Throttled]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
            backoff_rate: default_backoff_rate(),
            max_interval_ms: None,
            retry_on: default_retry_on(),
        }
    }
}

impl RetryPolicy {
    fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry max_attempts must be >= 1".to_string());
        }
        if !self.backoff_rate.is_finite() || self.backoff_rate < 1.0 {
            return Err("retry backoff_rate must be >= 1.0".to_string());
        }
        Ok(())
    }
}

/// Failure classes a retry policy can opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOn {
    Transport,
    FunctionError,
    Throttled,
    All,
}
