//! State-machine interpreter and task-invoker ports for Waypoint.
//!
//! This crate defines the `TaskInvoker` port that the infrastructure layer
//! implements. It depends only on `waypoint-types` -- never on
//! `waypoint-infra` or any network crate.

pub mod event;
pub mod workflow;
