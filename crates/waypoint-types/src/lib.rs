//! Shared domain types for Waypoint.
//!
//! This crate contains the wire format of state-machine definitions, engine
//! configuration, execution records and events, and their error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod workflow;
