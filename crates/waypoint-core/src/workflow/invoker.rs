//! Task invocation port.
//!
//! `TaskInvoker` is the abstraction every external operation implements
//! (remote compute functions, notification publishers, test fakes). It uses
//! native async fn in traits, so it cannot be a trait object directly; the
//! same blanket-impl pattern as the rest of the core applies:
//! 1. `TaskInvokerDyn` is the object-safe mirror with boxed futures
//! 2. every `T: TaskInvoker` gets `TaskInvokerDyn` for free
//! 3. `BoxTaskInvoker` wraps `Arc<dyn TaskInvokerDyn>` and delegates
//!
//! `InvokerRegistry` routes a resource identifier to the invoker registered
//! under the longest matching prefix and applies that route's retry policy.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use waypoint_types::config::RetryPolicy;

use super::retry::RetryHandler;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Failure reported by a task invoker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    #[error("no invoker registered for resource '{0}'")]
    NoInvokerForResource(String),

    /// The request never produced a response (connect, DNS, I/O).
    #[error("transport failure invoking '{resource}': {reason}")]
    Transport { resource: String, reason: String },

    /// The remote function ran and reported failure.
    #[error("function '{resource}' failed: {message}")]
    FunctionError { resource: String, message: String },

    #[error("resource '{resource}' throttled the request: {reason}")]
    Throttled { resource: String, reason: String },

    #[error("invalid response from '{resource}': {reason}")]
    InvalidResponse { resource: String, reason: String },

    /// The invoker refused the input before calling out.
    #[error("resource '{resource}' rejected the input: {reason}")]
    Rejected { resource: String, reason: String },
}

impl InvocationError {
    /// Stable kind name for events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            InvocationError::NoInvokerForResource(_) => "no_invoker_for_resource",
            InvocationError::Transport { .. } => "transport",
            InvocationError::FunctionError { .. } => "function_error",
            InvocationError::Throttled { .. } => "throttled",
            InvocationError::InvalidResponse { .. } => "invalid_response",
            InvocationError::Rejected { .. } => "rejected",
        }
    }
}

// ---------------------------------------------------------------------------
// TaskInvoker
// ---------------------------------------------------------------------------

/// Executes one named external operation.
///
/// `resource` is the opaque identifier from the Task state; `input` is the
/// effective task input after `Parameters`/`InputPath`. Implementations live
/// in `waypoint-infra` (HTTP functions, topic webhooks) and in tests.
pub trait TaskInvoker: Send + Sync {
    /// Human-readable invoker name, for logs.
    fn name(&self) -> &str;

    fn invoke(
        &self,
        resource: &str,
        input: &Value,
    ) -> impl Future<Output = Result<Value, InvocationError>> + Send;
}

/// Object-safe version of [`TaskInvoker`] with boxed futures.
pub trait TaskInvokerDyn: Send + Sync {
    fn name(&self) -> &str;

    fn invoke_boxed<'a>(
        &'a self,
        resource: &'a str,
        input: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, InvocationError>> + Send + 'a>>;
}

impl<T: TaskInvoker> TaskInvokerDyn for T {
    fn name(&self) -> &str {
        TaskInvoker::name(self)
    }

    fn invoke_boxed<'a>(
        &'a self,
        resource: &'a str,
        input: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, InvocationError>> + Send + 'a>> {
        Box::pin(self.invoke(resource, input))
    }
}

/// Type-erased, cheaply cloneable task invoker.
#[derive(Clone)]
pub struct BoxTaskInvoker {
    inner: Arc<dyn TaskInvokerDyn>,
}

impl BoxTaskInvoker {
    pub fn new<T: TaskInvoker + 'static>(invoker: T) -> Self {
        Self {
            inner: Arc::new(invoker),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn invoke(&self, resource: &str, input: &Value) -> Result<Value, InvocationError> {
        self.inner.invoke_boxed(resource, input).await
    }
}

impl std::fmt::Debug for BoxTaskInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTaskInvoker")
            .field("name", &self.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// InvokerRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Route {
    prefix: String,
    invoker: BoxTaskInvoker,
    retry: Option<RetryPolicy>,
}

/// Resource-prefix routing table.
#[derive(Debug, Clone, Default)]
pub struct InvokerRegistry {
    routes: Vec<Route>,
}

impl InvokerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every resource starting with `prefix` to `invoker`.
    ///
    /// Registering the same prefix again replaces the earlier route.
    pub fn register(
        &mut self,
        prefix: impl Into<String>,
        invoker: BoxTaskInvoker,
        retry: Option<RetryPolicy>,
    ) {
        let prefix = prefix.into();
        self.routes.retain(|route| route.prefix != prefix);
        self.routes.push(Route {
            prefix,
            invoker,
            retry,
        });
    }

    /// Builder-style `register`.
    pub fn with_route(
        mut self,
        prefix: impl Into<String>,
        invoker: BoxTaskInvoker,
        retry: Option<RetryPolicy>,
    ) -> Self {
        self.register(prefix, invoker, retry);
        self
    }

    /// Registered prefixes, longest first.
    pub fn prefixes(&self) -> Vec<&str> {
        let mut prefixes: Vec<&str> = self.routes.iter().map(|r| r.prefix.as_str()).collect();
        prefixes.sort_by_key(|p| std::cmp::Reverse(p.len()));
        prefixes
    }

    /// Name of the invoker that would handle `resource`.
    pub fn invoker_for(&self, resource: &str) -> Option<&str> {
        self.route(resource).map(|route| route.invoker.name())
    }

    fn route(&self, resource: &str) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|route| resource.starts_with(route.prefix.as_str()))
            .max_by_key(|route| route.prefix.len())
    }

    /// Invoke `resource`, retrying per the route's policy.
    pub async fn invoke(&self, resource: &str, input: &Value) -> Result<Value, InvocationError> {
        let route = self
            .route(resource)
            .ok_or_else(|| InvocationError::NoInvokerForResource(resource.to_string()))?;

        let mut attempt: u32 = 1;
        loop {
            let err = match route.invoker.invoke(resource, input).await {
                Ok(output) => return Ok(output),
                Err(err) => err,
            };
            let Some(policy) = route
                .retry
                .as_ref()
                .filter(|policy| RetryHandler::should_retry(policy, attempt, &err))
            else {
                return Err(err);
            };

            let delay = RetryHandler::backoff_delay(policy, attempt);
            tracing::warn!(
                resource,
                invoker = route.invoker.name(),
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "task invocation failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use waypoint_types::config::RetryOn;

    struct EchoInvoker(&'static str);

    impl TaskInvoker for EchoInvoker {
        fn name(&self) -> &str {
            self.0
        }

        async fn invoke(&self, resource: &str, input: &Value) -> Result<Value, InvocationError> {
            Ok(json!({ "invoker": self.0, "resource": resource, "input": input }))
        }
    }

    /// Fails with `error` for the first `failures` calls, then succeeds.
    struct FlakyInvoker {
        failures: u32,
        error: InvocationError,
        calls: Arc<AtomicU32>,
    }

    impl TaskInvoker for FlakyInvoker {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn invoke(&self, _resource: &str, _input: &Value) -> Result<Value, InvocationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(self.error.clone())
            } else {
                Ok(json!({ "call": call }))
            }
        }
    }

    fn transport() -> InvocationError {
        InvocationError::Transport {
            resource: "arn:aws:lambda:fn".to_string(),
            reason: "connection reset".to_string(),
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            interval_ms: 10,
            backoff_rate: 2.0,
            max_interval_ms: None,
            retry_on: vec![RetryOn::Transport],
        }
    }

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let registry = InvokerRegistry::new()
            .with_route("arn:aws:", BoxTaskInvoker::new(EchoInvoker("generic")), None)
            .with_route(
                "arn:aws:states:::sns:",
                BoxTaskInvoker::new(EchoInvoker("sns")),
                None,
            );

        let out = registry
            .invoke("arn:aws:states:::sns:publish", &json!({}))
            .await
            .unwrap();
        assert_eq!(out["invoker"], "sns");

        let out = registry
            .invoke("arn:aws:lambda:us-east-1:1:function:F", &json!({ "x": 1 }))
            .await
            .unwrap();
        assert_eq!(out["invoker"], "generic");
        assert_eq!(out["input"], json!({ "x": 1 }));

        assert_eq!(registry.prefixes(), vec!["arn:aws:states:::sns:", "arn:aws:"]);
        assert_eq!(registry.invoker_for("arn:aws:s3:::b"), Some("generic"));
    }

    #[tokio::test]
    async fn test_unrouted_resource_fails() {
        let registry = InvokerRegistry::new();
        let err = registry.invoke("local:thing", &json!({})).await.unwrap_err();
        assert_eq!(err, InvocationError::NoInvokerForResource("local:thing".to_string()));
        assert_eq!(err.kind(), "no_invoker_for_resource");
    }

    #[tokio::test]
    async fn test_register_same_prefix_replaces() {
        let mut registry = InvokerRegistry::new();
        registry.register("p:", BoxTaskInvoker::new(EchoInvoker("old")), None);
        registry.register("p:", BoxTaskInvoker::new(EchoInvoker("new")), None);
        assert_eq!(registry.prefixes().len(), 1);
        assert_eq!(registry.invoker_for("p:x"), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = InvokerRegistry::new().with_route(
            "arn:aws:lambda:",
            BoxTaskInvoker::new(FlakyInvoker {
                failures: 2,
                error: transport(),
                calls: calls.clone(),
            }),
            Some(fast_retry(3)),
        );

        let out = registry.invoke("arn:aws:lambda:fn", &json!({})).await.unwrap();
        assert_eq!(out["call"], 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = InvokerRegistry::new().with_route(
            "arn:aws:lambda:",
            BoxTaskInvoker::new(FlakyInvoker {
                failures: 10,
                error: transport(),
                calls: calls.clone(),
            }),
            Some(fast_retry(2)),
        );

        let err = registry.invoke("arn:aws:lambda:fn", &json!({})).await.unwrap_err();
        assert_eq!(err, transport());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = InvokerRegistry::new().with_route(
            "arn:aws:lambda:",
            BoxTaskInvoker::new(FlakyInvoker {
                failures: 2,
                error: transport(),
                calls: calls.clone(),
            }),
            Some(RetryPolicy {
                interval_ms: 1000,
                ..fast_retry(3)
            }),
        );

        let started = tokio::time::Instant::now();
        registry.invoke("arn:aws:lambda:fn", &json!({})).await.unwrap();
        // 1000ms + 2000ms of backoff on the paused clock.
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_no_retry_without_policy() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = InvokerRegistry::new().with_route(
            "arn:aws:lambda:",
            BoxTaskInvoker::new(FlakyInvoker {
                failures: 1,
                error: transport(),
                calls: calls.clone(),
            }),
            None,
        );

        assert!(registry.invoke("arn:aws:lambda:fn", &json!({})).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let error = InvocationError::FunctionError {
            resource: "arn:aws:lambda:fn".to_string(),
            message: "Unhandled".to_string(),
        };
        let registry = InvokerRegistry::new().with_route(
            "arn:aws:lambda:",
            BoxTaskInvoker::new(FlakyInvoker {
                failures: 1,
                error: error.clone(),
                calls: calls.clone(),
            }),
            Some(fast_retry(5)),
        );

        assert_eq!(
            registry.invoke("arn:aws:lambda:fn", &json!({})).await.unwrap_err(),
            error
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_box_invoker_debug_names_invoker() {
        let boxed = BoxTaskInvoker::new(EchoInvoker("echo"));
        assert!(format!("{boxed:?}").contains("echo"));
    }
}
