//! Infrastructure implementations for Waypoint.
//!
//! This crate provides the concrete task invokers behind the `TaskInvoker`
//! port defined in `waypoint-core`, plus engine configuration loading and
//! the wiring from configured routes to an `InvokerRegistry`.

pub mod config;
pub mod invoker;
pub mod registry;
