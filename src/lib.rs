//! Kindle: a small Lisp interpreter with a source-level debugger.
//!
//! Source text flows through [`reader`] (tokens, then an AST), [`expander`]
//! (compile-time macros) and [`eval`] (tree walking). [`runtime`] wraps the
//! pipeline; [`debugger`] hooks into the evaluator before every list form.

pub mod core;
pub mod debugger;
pub mod devtools;
pub mod env;
pub mod error;
pub mod eval;
pub mod expander;
pub mod formatter;
pub mod reader;
pub mod repl;
pub mod runtime;
pub mod value;

pub use debugger::{debug_program, Breakpoint, Debugger};
pub use env::{Scope, Sink};
pub use error::{Diagnostic, Error, EvalResult, StopReason, SyntaxError};
pub use runtime::{create_default_scope, eval, safe_eval, EvalOptions};
pub use value::{Value, ValueType};
