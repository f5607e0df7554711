//! Concrete `TaskInvoker` implementations.
//!
//! - `http_function` -- compute tasks: POST the task input to a function endpoint
//! - `topic` -- notification tasks: publish `TopicArn`/`Subject`/`Message` to a webhook

pub mod http_function;
pub mod topic;

pub use http_function::HttpFunctionInvoker;
pub use topic::TopicPublisherInvoker;

/// Header carrying the task's resource identifier on outgoing requests.
pub const RESOURCE_HEADER: &str = "X-Waypoint-Resource";
