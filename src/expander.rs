use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::env::Scope;
use crate::error::{Error, SyntaxError};
use crate::value::Value;

/// Upper bound on rewrite passes; a self-expanding macro stops here.
pub const MAX_EXPANSION_PASSES: usize = 64;

pub const DEFINE_MACRO_EXPAND: &str = "define-macro-expand";
pub const DEFINE_MACRO: &str = "define-macro";
pub const DEFINE_MACRO_EVAL: &str = "define-macro-eval";

/// A macro body together with its formal parameters.
///
/// Compile-time macros are rewritten away by [`Expander`]. Runtime macros
/// (`runtime == true`) stay in the tree and are substituted by the
/// evaluator each time a call is reached.
#[derive(Debug)]
pub struct Macro {
    pub params: Vec<Rc<str>>,
    pub body: Value,
    pub runtime: bool,
}

/// Splits `(define-macro-* name (params...) body)` into its parts.
pub fn parse_definition(form: &[Value]) -> Result<(Rc<str>, Macro), Error> {
    let line = form.first().and_then(Value::line).unwrap_or(0);
    let bad = |what: &str| Error::syntax(SyntaxError::BadForm(what.to_string()), line);

    if form.len() != 4 {
        return Err(bad("macro definition needs a name, a parameter list and a body"));
    }
    let name = form[1].as_symbol().map_err(|_| bad("macro name must be a symbol"))?.clone();
    let params = form[2]
        .as_list()
        .map_err(|_| bad("macro parameters must be a list"))?
        .iter()
        .map(|p| p.as_symbol().cloned().map_err(|_| bad("macro parameter must be a symbol")))
        .collect::<Result<Vec<_>, _>>()?;
    let runtime = form[0].is_symbol_named(DEFINE_MACRO_EVAL);

    Ok((name, Macro { params, body: form[3].clone(), runtime }))
}

/// Replaces every formal parameter of `mac` in its body with the argument form.
pub fn substitute(name: &str, mac: &Macro, args: &[Value]) -> Result<Value, Error> {
    if args.len() < mac.params.len() {
        return Err(Error::runtime(format!(
            "macro {} expects {} arguments, got {}",
            name,
            mac.params.len(),
            args.len()
        )));
    }
    let bindings: FxHashMap<&str, &Value> =
        mac.params.iter().map(|p| p.as_ref()).zip(args.iter()).collect();
    Ok(replace_symbols(&mac.body, &bindings))
}

fn replace_symbols(node: &Value, bindings: &FxHashMap<&str, &Value>) -> Value {
    match node {
        Value::Symbol { name, .. } => match bindings.get(name.as_ref()) {
            Some(arg) => (*arg).clone(),
            None => node.clone(),
        },
        Value::List { items, token } => Value::List {
            items: Rc::new(items.iter().map(|item| replace_symbols(item, bindings)).collect()),
            token: token.clone(),
        },
        other => other.clone(),
    }
}

//===----------------------------------------------------------------------===//
// Expander
//===----------------------------------------------------------------------===//

pub struct Expander {
    scope: Scope,
}

impl Expander {
    pub fn new(scope: &Scope) -> Self {
        Self { scope: scope.global() }
    }

    /// Rewrites compile-time macros until the tree stops changing.
    pub fn expand(&self, ast: Value) -> Result<Value, Error> {
        if !contains_definition(&ast) && !self.scope.has_macros() {
            return Ok(ast);
        }

        let mut ast = ast;
        for _ in 0..MAX_EXPANSION_PASSES {
            let mut changed = false;
            ast = self.walk(&ast, &mut changed)?.unwrap_or(Value::Undefined);
            if !changed {
                return Ok(ast);
            }
        }

        log::warn!("macro expansion stopped after {} passes", MAX_EXPANSION_PASSES);
        Ok(ast)
    }

    /// Returns `None` when the node was a macro definition and should be dropped.
    fn walk(&self, node: &Value, changed: &mut bool) -> Result<Option<Value>, Error> {
        let (items, token) = match node {
            Value::List { items, token } => (items, token),
            other => return Ok(Some(other.clone())),
        };

        if let Value::Symbol { name, .. } = &items[0] {
            match name.as_ref() {
                "quote" => return Ok(Some(node.clone())),
                DEFINE_MACRO_EXPAND | DEFINE_MACRO => {
                    let (name, mac) = parse_definition(items)?;
                    self.scope.define_macro(name, mac);
                    *changed = true;
                    return Ok(None);
                }
                _ => {}
            }

            if let Some(mac) = self.scope.lookup_macro(name).filter(|m| !m.runtime) {
                log::debug!("expand macro {}", name);
                *changed = true;
                return substitute(name, &mac, &items[1..]).map(Some);
            }
        }

        let mut rewritten = Vec::with_capacity(items.len());
        for item in items.iter() {
            if let Some(item) = self.walk(item, changed)? {
                rewritten.push(item);
            }
        }

        if rewritten.is_empty() {
            Ok(Some(Value::Nil { token: token.clone() }))
        } else {
            Ok(Some(Value::List { items: Rc::new(rewritten), token: token.clone() }))
        }
    }
}

fn contains_definition(node: &Value) -> bool {
    match node {
        Value::List { items, .. } => {
            items[0].is_symbol_named(DEFINE_MACRO_EXPAND)
                || items[0].is_symbol_named(DEFINE_MACRO)
                || items.iter().any(contains_definition)
        }
        _ => false,
    }
}

/// Runs the expander for one top-level evaluation.
pub fn expand(ast: Value, scope: &Scope) -> Result<Value, Error> {
    Expander::new(scope).expand(ast)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::env::Sink;
    use crate::formatter::format_value;
    use crate::reader::read;

    fn scope() -> Scope {
        let sink: Sink = Rc::new(RefCell::new(Vec::<u8>::new()));
        Scope::new_global(sink)
    }

    fn expand_str(source: &str, scope: &Scope) -> String {
        format_value(&expand(read(source).unwrap(), scope).unwrap())
    }

    #[test]
    fn tree_without_macros_is_unchanged() {
        let s = scope();
        let source = "(do (def a 1) (print (+ a 2)))";
        assert_eq!(expand_str(source, &s), source);
    }

    #[test]
    fn definition_is_removed_and_calls_rewritten() {
        let s = scope();
        let out = expand_str("(do (define-macro-expand twice (x) (+ x x)) (twice (f 1)))", &s);
        assert_eq!(out, "(do (+ (f 1) (f 1)))");
        assert!(s.lookup_macro("twice").is_some());
    }

    #[test]
    fn nested_macros_expand_to_fixpoint() {
        let s = scope();
        let source = "(do \
            (define-macro-expand inc (a) (+ a 1)) \
            (define-macro-expand incinc (b) (inc (inc b))) \
            (incinc 5))";
        assert_eq!(expand_str(source, &s), "(do (+ (+ 5 1) 1))");
    }

    #[test]
    fn quoted_forms_are_left_alone() {
        let s = scope();
        let out = expand_str("(do (define-macro inc (a) (+ a 1)) (quote (inc 2)))", &s);
        assert_eq!(out, "(do (quote (inc 2)))");
    }

    #[test]
    fn runtime_macros_are_not_expanded() {
        let s = scope();
        let source = "(do (define-macro-eval m (a) (* a 2)) (m 3))";
        assert_eq!(expand_str(source, &s), source);
    }

    #[test]
    fn malformed_definition_is_a_syntax_error() {
        let s = scope();
        let result = expand(read("(define-macro-expand 42 (a) a)").unwrap(), &s);
        assert!(matches!(result, Err(Error::SyntaxError { .. })));
    }

    #[test]
    fn missing_macro_arguments_fail() {
        let s = scope();
        let result = expand(read("(do (define-macro-expand two (a b) (+ a b)) (two 1))").unwrap(), &s);
        assert!(matches!(result, Err(Error::RuntimeError(_))));
    }
}
