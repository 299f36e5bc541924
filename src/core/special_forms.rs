use std::rc::Rc;

use crate::core::{expect_args, register_special};
use crate::env::Scope;
use crate::error::{Error, EvalResult};
use crate::eval::eval_ast;
use crate::expander::{parse_definition, DEFINE_MACRO, DEFINE_MACRO_EVAL, DEFINE_MACRO_EXPAND};
use crate::value::{Function, Value};

//===----------------------------------------------------------------------===//
// Special Forms
//
// Special forms receive their arguments unevaluated.
//===----------------------------------------------------------------------===//

pub fn install(scope: &Scope) {
    register_special(scope, "quote", "(quote expr)", quote);
    register_special(scope, "quasiquote", "(quasiquote expr)", quasiquote);
    register_special(scope, "if", "(if cond then [else])", if_form);
    register_special(scope, "do", "(do expr ...)", do_form);
    register_special(scope, "begin", "(begin expr ...)", do_form);
    register_special(scope, "def", "(def name expr)", def);
    register_special(scope, "gdef", "(gdef name expr)", gdef);
    register_special(scope, "setf", "(setf name expr)", setf);
    register_special(scope, "fn", "(fn (params) body ...)", lambda);
    register_special(scope, "lambda", "(lambda (params) body ...)", lambda);
    register_special(scope, "defn", "(defn name (params) body ...)", defn);
    register_special(scope, "gdefn", "(gdefn name (params) body ...)", gdefn);
    register_special(scope, "while", "(while cond body ...)", while_form);
    register_special(scope, "and", "(and expr ...)", and);
    register_special(scope, "or", "(or expr ...)", or);
    register_special(
        scope,
        DEFINE_MACRO_EXPAND,
        "(define-macro-expand name (params) body)",
        define_macro_expand,
    );
    register_special(scope, DEFINE_MACRO, "(define-macro name (params) body)", define_macro_expand);
    register_special(
        scope,
        DEFINE_MACRO_EVAL,
        "(define-macro-eval name (params) body)",
        define_macro_eval,
    );
}

/// `(quote expr)`: returns `expr` unevaluated.
pub fn quote(args: &[Value], _scope: &Scope) -> EvalResult {
    expect_args("quote", args, 1)?;
    Ok(args[0].clone())
}

/// `(quasiquote expr)`: like `quote`, but `(unquote x)` is replaced by the
/// value of `x` and `(unquote-splicing xs)` splices the list `xs` in place.
pub fn quasiquote(args: &[Value], scope: &Scope) -> EvalResult {
    expect_args("quasiquote", args, 1)?;
    unquote_walk(&args[0], scope)
}

fn unquote_walk(node: &Value, scope: &Scope) -> EvalResult {
    let items = match node {
        Value::List { items, .. } => items,
        other => return Ok(other.clone()),
    };

    if items[0].is_symbol_named("unquote") {
        expect_args("unquote", &items[1..], 1)?;
        return eval_ast(&items[1], scope);
    }

    let mut result = Vec::with_capacity(items.len());
    for item in items.iter() {
        match item {
            Value::List { items: inner, .. } if inner[0].is_symbol_named("unquote-splicing") => {
                expect_args("unquote-splicing", &inner[1..], 1)?;
                let spliced = eval_ast(&inner[1], scope)?;
                result.extend_from_slice(spliced.as_list()?);
            }
            other => result.push(unquote_walk(other, scope)?),
        }
    }
    Ok(Value::list(result))
}

/// `(if cond then [else])`: a missing else branch yields nil.
pub fn if_form(args: &[Value], scope: &Scope) -> EvalResult {
    expect_args("if", args, 2)?;
    if eval_ast(&args[0], scope)?.is_true() {
        eval_ast(&args[1], scope)
    } else {
        match args.get(2) {
            Some(otherwise) => eval_ast(otherwise, scope),
            None => Ok(Value::nil()),
        }
    }
}

/// `(do expr ...)`: evaluates in order and returns the last value.
pub fn do_form(args: &[Value], scope: &Scope) -> EvalResult {
    let mut result = Value::Undefined;
    for arg in args {
        result = eval_ast(arg, scope)?;
    }
    Ok(result)
}

/// The name of a definition: a literal symbol, or an expression producing one.
fn binding_name(name: &Value, scope: &Scope) -> EvalResult<Rc<str>> {
    match name {
        Value::Symbol { name, .. } => Ok(name.clone()),
        other => match eval_ast(other, scope)? {
            Value::Symbol { name, .. } => Ok(name),
            Value::String { value, .. } => Ok(value),
            value => Err(Error::InvalidCast { expected: "symbol", found: value.type_of() }.into()),
        },
    }
}

/// `(def name expr)`: binds in the current frame and returns the value.
pub fn def(args: &[Value], scope: &Scope) -> EvalResult {
    define_in(args, scope, scope, "def")
}

/// `(gdef name expr)`: binds in the global frame.
pub fn gdef(args: &[Value], scope: &Scope) -> EvalResult {
    define_in(args, scope, &scope.global(), "gdef")
}

fn define_in(args: &[Value], scope: &Scope, target: &Scope, form: &str) -> EvalResult {
    expect_args(form, args, 2)?;
    let name = binding_name(&args[0], scope)?;
    let value = eval_ast(&args[1], scope)?;
    target.bind(name, value.clone());
    Ok(value)
}

/// `(setf name expr)`: assigns to the nearest existing binding.
pub fn setf(args: &[Value], scope: &Scope) -> EvalResult {
    expect_args("setf", args, 2)?;
    let name = binding_name(&args[0], scope)?;
    let value = eval_ast(&args[1], scope)?;
    scope.set(&name, value.clone())?;
    Ok(value)
}

fn make_lambda(name: &str, params: &Value, body: &[Value], scope: &Scope) -> EvalResult {
    let params = params
        .as_list()?
        .iter()
        .map(|p| p.as_symbol().cloned())
        .collect::<Result<Vec<_>, _>>()?;

    let body = match body {
        [single] => single.clone(),
        forms => {
            let token = forms.first().and_then(|f| f.token().cloned());
            let mut items = vec![Value::Symbol { name: Rc::from("do"), token: token.clone() }];
            items.extend_from_slice(forms);
            Value::List { items: Rc::new(items), token }
        }
    };

    Ok(Value::function(Function::lambda(name, params, body, scope.clone())))
}

/// `(fn (params) body ...)`: a closure over the current frame.
pub fn lambda(args: &[Value], scope: &Scope) -> EvalResult {
    expect_args("fn", args, 2)?;
    make_lambda("<lambda>", &args[0], &args[1..], scope)
}

/// `(defn name (params) body ...)`: `def` of a named `fn`.
pub fn defn(args: &[Value], scope: &Scope) -> EvalResult {
    define_function(args, scope, scope, "defn")
}

/// `(gdefn name (params) body ...)`: `gdef` of a named `fn`.
pub fn gdefn(args: &[Value], scope: &Scope) -> EvalResult {
    define_function(args, scope, &scope.global(), "gdefn")
}

fn define_function(args: &[Value], scope: &Scope, target: &Scope, form: &str) -> EvalResult {
    expect_args(form, args, 3)?;
    let name = binding_name(&args[0], scope)?;
    let func = make_lambda(&name, &args[1], &args[2..], scope)?;
    target.bind(name, func.clone());
    Ok(func)
}

/// `(while cond body ...)`: returns the last body value, or nil if the body never ran.
pub fn while_form(args: &[Value], scope: &Scope) -> EvalResult {
    expect_args("while", args, 1)?;
    let mut result = Value::nil();
    while eval_ast(&args[0], scope)?.is_true() {
        for form in &args[1..] {
            result = eval_ast(form, scope)?;
        }
    }
    Ok(result)
}

/// `(and expr ...)`: stops at the first false value.
pub fn and(args: &[Value], scope: &Scope) -> EvalResult {
    for arg in args {
        if !eval_ast(arg, scope)?.is_true() {
            return Ok(Value::bool(false));
        }
    }
    Ok(Value::bool(true))
}

/// `(or expr ...)`: stops at the first true value.
pub fn or(args: &[Value], scope: &Scope) -> EvalResult {
    for arg in args {
        if eval_ast(arg, scope)?.is_true() {
            return Ok(Value::bool(true));
        }
    }
    Ok(Value::bool(false))
}

fn register_macro(head: &str, args: &[Value], scope: &Scope) -> EvalResult {
    let mut form = vec![Value::symbol(head)];
    form.extend_from_slice(args);
    let (name, mac) = parse_definition(&form)?;
    scope.define_macro(name, mac);
    Ok(Value::Undefined)
}

/// `(define-macro-expand name (params) body)` reached at run time.
///
/// Compile-time definitions are normally consumed by the expander; this
/// covers definitions produced while running, e.g. through `eval`.
pub fn define_macro_expand(args: &[Value], scope: &Scope) -> EvalResult {
    register_macro(DEFINE_MACRO_EXPAND, args, scope)
}

/// `(define-macro-eval name (params) body)`: a macro substituted and
/// evaluated in the caller's frame every time it is called.
pub fn define_macro_eval(args: &[Value], scope: &Scope) -> EvalResult {
    register_macro(DEFINE_MACRO_EVAL, args, scope)
}
