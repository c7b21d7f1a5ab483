//! Story interpreter
//!
//! The execution half of the runtime:
//! - [`engine`]: the block walker with the read-mode machine, glue,
//!   visit counting, and divert resolution
//! - [`expressions`]: the sandboxed expression evaluator
//! - [`builtins`]: `LIST_*`, `SEED_RANDOM`, `RANDOM`
//! - [`lists`]: ordinal-aware list algebra
//! - [`errors`]: runtime error types
//!
//! # Execution model
//!
//! Public session calls walk the block tree until the next paragraph or
//! choice boundary, queuing output on the session state. Every call
//! returns after a bounded amount of interpretation; nothing suspends.

use crate::state::value::Value;

pub(crate) mod builtins;
pub(crate) mod engine;
pub mod errors;
pub(crate) mod expressions;
pub mod lists;

/// A host-bound function callable from story expressions: scalars in,
/// scalar or list value out.
pub type HostFn = Box<dyn Fn(&[Value]) -> Value>;
