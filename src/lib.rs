//! # Introduction
//!
//! Skein is a runtime for an Ink-family interactive branching-narrative
//! language. A script of knots, stitches, choices, diverts, and inline
//! expressions is parsed into an immutable story model, then played
//! through a [`Session`] that alternately emits paragraphs and presents
//! choice menus.
//!
//! ## Pipeline
//!
//! ```text
//! Source → Lexer → Parser → Story → Interpreter → Session queues
//! ```
//!
//! 1. [`parser`] — strips comments, classifies lines, and builds the
//!    knot → stitch → block tree plus declaration tables.
//! 2. [`interpreter`] — walks blocks under the read-mode machine,
//!    evaluating inline expressions in a sandboxed AST interpreter.
//! 3. [`state`] — the mutable run state: variables, visit counters,
//!    queues, and the serde snapshot used for save/load.
//! 4. [`session`] — the public façade: `begin`, `advance`, `choose`,
//!    observers, host function binding, save/load with migration.
//!
//! ## Supported script surface
//!
//! `INCLUDE`, `CONST`, `VAR`, `LIST`; knots `=== name ===` and stitches
//! `= name =`; paragraphs with `(label)`, `-> divert`, `#tag`s; `*`/`+`
//! choices with `{condition}`, `[caption]` splits, and nesting; gathers
//! `-`; `~` assignments; inline `{expr}`, alternatives `{a|b|c}` with
//! sequencing modes, conditions and switches; glue `<>`; `-> END` /
//! `-> DONE`; comments `//`, `/* */`, `TODO:`.

pub mod interpreter;
pub mod parser;
pub mod session;
pub mod state;

pub use interpreter::errors::RuntimeError;
pub use interpreter::HostFn;
pub use parser::ast::{Story, Version};
pub use parser::parser::{ParseError, Parser};
pub use session::{MigratorFn, ObserverFn, Session};
pub use state::value::{ListValue, Value};
pub use state::{Paragraph, PendingChoice, Snapshot};
