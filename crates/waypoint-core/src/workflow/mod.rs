//! Workflow engine core: definition compilation, condition evaluation, and
//! the state-machine interpreter.
//!
//! - `path` -- parsed `$.a.b[0]` accessors over the execution context
//! - `definition` -- parsing, load-time validation, compiled `StateMachine`
//! - `condition` -- Choice rule predicates and glob matching
//! - `parameters` -- Task `Parameters` templates (`Literal` vs `PathRef`)
//! - `context` -- the per-execution document and result merging
//! - `invoker` -- `TaskInvoker` port, type-erased wrapper, prefix registry
//! - `retry` -- per-route retry decisions and backoff delays
//! - `interpreter` -- the bounded control loop

pub mod condition;
pub mod context;
pub mod definition;
pub mod interpreter;
pub mod invoker;
pub mod parameters;
pub mod path;
pub mod retry;
