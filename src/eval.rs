use std::rc::Rc;

use crate::env::Scope;
use crate::error::{Diagnostic, Error, EvalResult};
use crate::expander::substitute;
use crate::value::{Callable, Function, Value};

//===----------------------------------------------------------------------===//
// Evaluator
//===----------------------------------------------------------------------===//

/// Evaluates one AST node in `scope`.
///
/// Atoms evaluate to themselves and symbols resolve along the lexical chain.
/// Every list node first updates the frame position and consults the
/// attached debugger before anything inside it runs.
pub fn eval_ast(ast: &Value, scope: &Scope) -> EvalResult {
    match ast {
        Value::Symbol { name, .. } => scope.resolve(name).ok_or_else(|| {
            fail(Error::UnboundSymbol(name.to_string()), ast.line(), scope)
        }),
        Value::List { items, .. } => eval_list(ast, items, scope),
        other => Ok(other.clone()),
    }
}

fn eval_list(form: &Value, items: &[Value], scope: &Scope) -> EvalResult {
    scope.set_current_token(form.token().cloned());

    if let Some(debugger) = scope.active_debugger() {
        if debugger.needs_break(scope, form.line()) {
            debugger.suspend(scope, form)?;
        }
    }

    log::trace!("eval {} line={:?} depth={}", items[0], form.line(), scope.call_stack_depth());
    if scope.tracing() {
        scope.record_trace(format!("--> {}", items[0]))?;
    }

    match eval_call(items, scope) {
        Ok(value) => Ok(value),
        Err(diag) => Err(handle_error(diag, form, scope)),
    }
}

fn eval_call(items: &[Value], scope: &Scope) -> EvalResult {
    let head = &items[0];
    let args = &items[1..];

    if let Value::Symbol { name, .. } = head {
        if let Some(mac) = scope.lookup_macro(name).filter(|m| m.runtime) {
            log::debug!("evaluate runtime macro {}", name);
            let expanded = substitute(name, &mac, args)?;
            return eval_ast(&expanded, scope);
        }
    }

    let func = match eval_ast(head, scope)? {
        Value::Function(func) => func,
        other => {
            return Err(Error::runtime(format!("{} is not a function", other)).into());
        }
    };

    if func.special_form {
        return match &func.callable {
            Callable::Native(f) => f(args, scope),
            Callable::Lambda(_) => Err(Error::runtime("special form must be native").into()),
        };
    }

    let values = args.iter().map(|arg| eval_ast(arg, scope)).collect::<EvalResult<Vec<_>>>()?;
    apply(&func, values, scope)
}

/// Calls `func` with already evaluated arguments.
///
/// Lambdas get a fresh frame: lexical parent is the closure scope, caller is
/// `scope`. The frame is unlinked from the call chain when the call returns.
pub fn apply(func: &Rc<Function>, args: Vec<Value>, scope: &Scope) -> EvalResult {
    let lambda = match &func.callable {
        Callable::Native(f) => return f(&args, scope),
        Callable::Lambda(lambda) => lambda,
    };

    if args.len() < lambda.params.len() {
        return Err(Error::runtime(format!(
            "function {} expects {} arguments, got {}",
            func.name,
            lambda.params.len(),
            args.len()
        ))
        .into());
    }

    let closure = lambda.closure.upgrade().ok_or_else(|| {
        Error::runtime(format!("function {} outlived the scope it was defined in", func.name))
    })?;
    let frame = scope.new_call(&closure, &func.name, args.clone());
    for (param, arg) in lambda.params.iter().zip(args) {
        frame.bind(param.clone(), arg);
    }

    let result = eval_ast(&lambda.body, &frame);
    frame.detach();
    result
}

//===----------------------------------------------------------------------===//
// Errors
//===----------------------------------------------------------------------===//

/// Annotates a fresh error with the position of the node that raised it.
pub fn fail(error: impl Into<Diagnostic>, line: Option<usize>, scope: &Scope) -> Diagnostic {
    let diag: Diagnostic = error.into();
    diag.annotate(line.or_else(|| scope.current_line()), Some(scope.module_name()), || {
        scope.dump_stack(None)
    })
}

fn handle_error(diag: Diagnostic, form: &Value, scope: &Scope) -> Diagnostic {
    if diag.is_debugger_stop() {
        return diag;
    }

    let mut diag = fail(diag, form.line(), scope);
    if diag.suspended {
        return diag;
    }

    if let Some(debugger) = scope.active_debugger() {
        diag.suspended = true;
        if let Err(stop) = debugger.on_error(scope, form, &diag) {
            return stop;
        }
    }
    diag
}
