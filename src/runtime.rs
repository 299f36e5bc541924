use std::cell::RefCell;
use std::rc::Rc;

use crate::core;
use crate::env::{Scope, Sink};
use crate::error::{Diagnostic, EvalResult};
use crate::eval::eval_ast;
use crate::expander::expand;
use crate::reader;
use crate::value::Value;

/// Per-call evaluation settings.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Module the code belongs to. When set, frames report it and the source
    /// is kept for listings; when unset the scope keeps its current module.
    pub module_name: Option<String>,
    /// Enables step tracing. Never turns an already enabled trace off.
    pub tracing: bool,
    /// Mark the global scope finished after a successful run.
    pub update_finished: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self { module_name: None, tracing: false, update_finished: true }
    }
}

impl EvalOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, name: &str) -> Self {
        self.module_name = Some(name.to_string());
        self
    }

    pub fn tracing(mut self, on: bool) -> Self {
        self.tracing = on;
        self
    }

    pub fn update_finished(mut self, on: bool) -> Self {
        self.update_finished = on;
        self
    }
}

pub fn stdout_sink() -> Sink {
    Rc::new(RefCell::new(std::io::stdout()))
}

/// A global frame with every special form and builtin installed.
pub fn create_default_scope(sink: Sink) -> Scope {
    let scope = Scope::new_global(sink);
    core::install(&scope);
    scope
}

/// Tokenizes, parses, expands and evaluates `code`.
///
/// Without a scope a fresh default scope writing to stdout is used.
pub fn eval(code: &str, scope: Option<&Scope>, options: &EvalOptions) -> EvalResult {
    let scope = match scope {
        Some(scope) => scope.clone(),
        None => create_default_scope(stdout_sink()),
    };

    if let Some(module) = &options.module_name {
        scope.set_module_name(module);
        scope.set_source(module, code);
    }
    if options.tracing {
        scope.set_tracing(true);
    }

    let ast = reader::tokenize(code, 0)
        .and_then(reader::parse)
        .and_then(|ast| expand(ast, &scope))
        .map_err(|err| {
            Diagnostic::from(err).annotate(None, Some(scope.module_name()), String::new)
        })?;

    let result = eval_ast(&ast, &scope)?;
    if options.update_finished {
        scope.set_finished(true);
    }
    Ok(result)
}

/// Like [`eval`], but failures are reported through the sink and returned
/// as an `Error` value.
pub fn safe_eval(code: &str, scope: Option<&Scope>, options: &EvalOptions) -> Value {
    let scope = match scope {
        Some(scope) => scope.clone(),
        None => create_default_scope(stdout_sink()),
    };

    match eval(code, Some(&scope), options) {
        Ok(value) => value,
        Err(diag) => {
            let report = format!("\n{}\n", diag.format_error());
            if let Err(err) = scope.write_out(&report) {
                log::error!("failed to report error: {}", err);
            }
            Value::error(diag.error.to_string())
        }
    }
}
