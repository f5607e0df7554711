//! Builds an `InvokerRegistry` from configured routes.

use waypoint_core::workflow::invoker::{BoxTaskInvoker, InvokerRegistry};
use waypoint_types::config::{EngineConfig, InvokerKind, RouteConfig};
use waypoint_types::error::ConfigError;

use crate::invoker::{HttpFunctionInvoker, TopicPublisherInvoker};

/// Create one invoker per route, all sharing a single HTTP client.
pub fn build_registry(config: &EngineConfig) -> Result<InvokerRegistry, ConfigError> {
    let client = reqwest::Client::new();
    let mut registry = InvokerRegistry::new();

    for route in &config.routes {
        let invoker = build_invoker(&client, route)?;
        tracing::debug!(
            prefix = route.prefix.as_str(),
            invoker = invoker.name(),
            retry = route.retry.is_some(),
            "registered invoker route"
        );
        registry.register(route.prefix.clone(), invoker, route.retry.clone());
    }

    Ok(registry)
}

fn build_invoker(client: &reqwest::Client, route: &RouteConfig) -> Result<BoxTaskInvoker, ConfigError> {
    match route.kind {
        InvokerKind::HttpFunction => {
            let endpoint = route.endpoint.clone().ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "route '{}': http_function requires an endpoint",
                    route.prefix
                ))
            })?;
            Ok(BoxTaskInvoker::new(HttpFunctionInvoker::with_client(
                client.clone(),
                endpoint,
            )))
        }
        InvokerKind::TopicWebhook => Ok(BoxTaskInvoker::new(TopicPublisherInvoker::with_client(
            client.clone(),
            route.topics.clone(),
            route.endpoint.clone(),
        ))),
    }
}
