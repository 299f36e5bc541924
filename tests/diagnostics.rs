use std::cell::RefCell;
use std::rc::Rc;

use kindle::env::{Scope, Sink};
use kindle::error::{Error, SyntaxError};
use kindle::runtime::{create_default_scope, eval, safe_eval, EvalOptions};

fn scope_with_buffer() -> (Scope, Rc<RefCell<Vec<u8>>>) {
    let buffer = Rc::new(RefCell::new(Vec::<u8>::new()));
    let sink: Sink = buffer.clone();
    (create_default_scope(sink), buffer)
}

fn output(buffer: &Rc<RefCell<Vec<u8>>>) -> String {
    String::from_utf8(buffer.borrow().clone()).unwrap()
}

#[test]
fn unbound_symbol_reports_line_and_module() {
    let (scope, _) = scope_with_buffer();
    let options = EvalOptions::new().module("script.lisp");
    let diag = eval("(do\n  (def a 1)\n  (print b))", Some(&scope), &options).unwrap_err();

    assert_eq!(diag.error, Error::UnboundSymbol("b".to_string()));
    assert_eq!(diag.line, Some(3));
    assert_eq!(diag.module.as_deref(), Some("script.lisp"));
    assert!(diag.stack.as_deref().unwrap().contains("name=<global>"));
}

#[test]
fn innermost_frame_wins_the_annotation() {
    let (scope, _) = scope_with_buffer();
    let source = "(do\n(defn inner (x)\n  (car x))\n(defn outer (y)\n  (inner y))\n(outer 5))";
    let diag = eval(source, Some(&scope), &EvalOptions::new()).unwrap_err();

    assert!(matches!(diag.error, Error::InvalidCast { .. }));
    assert_eq!(diag.line, Some(3));
    let stack = diag.stack.unwrap();
    let frames: Vec<&str> = stack.lines().collect();
    assert_eq!(frames.len(), 3);
    assert!(frames[0].contains("name=inner"));
    assert!(frames[1].contains("name=outer"));
    assert!(frames[2].contains("name=<global>"));
}

#[test]
fn frames_are_released_after_an_error() {
    let (scope, _) = scope_with_buffer();
    eval("(do (defn f () (car 1)) (f))", Some(&scope), &EvalOptions::new()).unwrap_err();
    assert_eq!(scope.call_stack_depth(), 1);
    assert!(scope.walk_down().is_none());
}

#[test]
fn special_form_argument_error() {
    let (scope, _) = scope_with_buffer();
    let diag = eval("\n(if)", Some(&scope), &EvalOptions::new()).unwrap_err();
    assert_eq!(diag.error, Error::RuntimeError("if expects 2 arguments, got 0".to_string()));
    assert_eq!(diag.line, Some(2));
}

#[test]
fn syntax_errors_carry_their_line() {
    let (scope, _) = scope_with_buffer();
    let diag = eval("(do\n  (print 1)\n  (print 2)", Some(&scope), &EvalOptions::new()).unwrap_err();
    assert_eq!(diag.error, Error::syntax(SyntaxError::UnbalancedParen, 1));
    assert_eq!(diag.line, Some(1));

    let diag = eval("(print \"abc)", Some(&scope), &EvalOptions::new()).unwrap_err();
    assert!(matches!(
        diag.error,
        Error::SyntaxError { error: SyntaxError::UnterminatedString, .. }
    ));
}

#[test]
fn macro_definition_errors_are_syntax_errors() {
    let (scope, _) = scope_with_buffer();
    let diag = eval("(define-macro-expand 5 (x) x)", Some(&scope), &EvalOptions::new()).unwrap_err();
    assert!(matches!(
        diag.error,
        Error::SyntaxError { error: SyntaxError::BadForm(_), line: 1 }
    ));
}

#[test]
fn safe_eval_reports_through_the_sink() {
    let (scope, buffer) = scope_with_buffer();
    let value = safe_eval(
        "(do\n(defn f (x) (+ x (list 1)))\n(f 2))",
        Some(&scope),
        &EvalOptions::new().module("calc.lisp"),
    );

    assert!(value.is_error());
    assert!(value.to_string().starts_with("Error: Invalid operation"));

    let report = output(&buffer);
    assert!(report.contains("Error executing script."));
    assert!(report.contains("line=2 module=calc.lisp"));
    assert!(report.contains("Callstack:"));
    assert!(report.contains("name=f"));
}

#[test]
fn safe_eval_passes_results_through() {
    let (scope, buffer) = scope_with_buffer();
    let value = safe_eval("(+ 40 2)", Some(&scope), &EvalOptions::new());
    assert_eq!(value.as_int().unwrap(), 42);
    assert!(output(&buffer).is_empty());
}
