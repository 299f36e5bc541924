use std::cell::RefCell;
use std::rc::Rc;

use kindle::env::Sink;
use kindle::error::{Diagnostic, Error};
use kindle::runtime::{create_default_scope, eval, EvalOptions};
use kindle::value::{Value, ValueType};

fn run_with_output(source: &str) -> (Result<Value, Diagnostic>, String) {
    let buffer = Rc::new(RefCell::new(Vec::<u8>::new()));
    let sink: Sink = buffer.clone();
    let scope = create_default_scope(sink);
    let result = eval(source, Some(&scope), &EvalOptions::new());
    let output = String::from_utf8(buffer.borrow().clone()).unwrap();
    (result, output)
}

fn run(source: &str) -> Value {
    run_with_output(source).0.unwrap()
}

fn run_err(source: &str) -> Error {
    run_with_output(source).0.unwrap_err().error
}

#[test]
fn comments_and_newlines_between_forms() {
    let (result, output) = run_with_output(
        "(do (println \"hello\") ; a comment\n(println; separate lists with comments\n\"world\"));comment in last line",
    );
    assert_eq!(result.unwrap().to_string(), "world");
    assert_eq!(output, "hello\nworld\n");
}

#[test]
fn string_literals_may_span_lines() {
    assert_eq!(run("(do (println \"hello\nworld\"))").to_string(), "hello\nworld");
}

#[test]
fn define_and_print() {
    let buffer = Rc::new(RefCell::new(Vec::<u8>::new()));
    let sink: Sink = buffer.clone();
    let scope = create_default_scope(sink);
    let result = eval("(do (def a 42) (print a))", Some(&scope), &EvalOptions::new()).unwrap();

    assert_eq!(result, Value::string("42"));
    assert_eq!(scope.resolve("a"), Some(Value::int(42)));
    assert_eq!(String::from_utf8(buffer.borrow().clone()).unwrap(), "42");
}

#[test]
fn if_with_and_without_else() {
    assert_eq!(run("(if #t (+ 1 2) (- 3 5))"), Value::int(3));
    assert_eq!(run("(if #f (* 1 0) (/ 6 3))"), Value::int(2));
    assert_eq!(run("(if true 1 0)"), Value::int(1));
    assert_eq!(run("(if false 1 0)"), Value::int(0));
    assert_eq!(run("(if true 1)"), Value::int(1));
    assert!(run("(if false 1)").is_nil());
}

#[test]
fn def_with_computed_name() {
    assert_eq!(run("(do (def a 1) (def b 1) (def (nth 2 (list 'a 'b 'c)) 9) (+ c 2))"), Value::int(11));
}

#[test]
fn def_nil_prints_nil() {
    assert_eq!(run("(do (def a nil) (println a))").to_string(), "nil");
}

#[test]
fn functions_and_global_definitions() {
    assert_eq!(run("(do (def f (fn (x) (+ x x 1))) (println (f 8)))").to_string(), "17");
    assert_eq!(run("(do (defn f (x) (gdef z (+ x x))) (f 8) (println z))").to_string(), "16");
    assert_eq!(run("(do (defn f (x) (gdefn g (x) (+ x x))) (f 2) (g 8))"), Value::int(16));
}

#[test]
fn eval_and_evalstr() {
    assert_eq!(run("(eval (list 'def 'x 43))"), Value::int(43));
    assert_eq!(run("(eval '(def x 456))"), Value::int(456));
    assert_eq!(run("(eval #t)"), Value::bool(true));
    assert_eq!(run("(eval 42)"), Value::int(42));
    assert_eq!(run("(evalstr \"(def x 456)\")"), Value::int(456));
    assert_eq!(run("(do (def a 4) (def lst '(a 2 3)) (eval `,(first lst)))"), Value::int(4));
}

#[test]
fn while_loop() {
    assert_eq!(
        run("(do (def a 1) (def b 1) (while (< a 10) (do (setf a (+ a 1)) (setf b (+ b 1)))))"),
        Value::int(10)
    );
}

#[test]
fn setf_reaches_enclosing_binding() {
    assert_eq!(
        run("(do (def g_prn \"START:\") (defn prn (x) (setf g_prn (+ g_prn x))) (prn \"34\") (println g_prn))")
            .to_string(),
        "START:34"
    );
}

#[test]
fn setf_of_unbound_symbol_fails() {
    assert_eq!(run_err("(setf nothing 1)"), Error::UnboundSymbol("nothing".to_string()));
}

#[test]
fn string_and_list_concatenation() {
    assert_eq!(run("(+ \"abc\" \"def() ; blub\" \"xxx\")").to_string(), "abcdef() ; blubxxx");
    assert_eq!(run("(+ '(1 2 3) '(\"hello world\" 2.3 42))").to_string(), "(1 2 3 \"hello world\" 2.3 42)");
    assert_eq!(run("(+ 1 \"x\")").to_string(), "1x");
}

#[test]
fn list_operations() {
    assert_eq!(run("(first '(1 2 3))"), Value::int(1));
    assert_eq!(run("(first '(a b c))").to_string(), "a");
    assert_eq!(run("(last '(abc def xyz))").to_string(), "xyz");
    assert_eq!(run("(car '(\"abc\" 2 3))").to_string(), "abc");
    assert_eq!(run("(cdr '(\"nix\" 1 2 3))").to_string(), "(1 2 3)");
    assert_eq!(run("(len '(1 2 3))"), Value::int(3));
    assert_eq!(run("(append (list 4 54 3) (list 7 9))").to_string(), "(4 54 3 7 9)");
}

#[test]
fn logical_operators() {
    assert_eq!(
        run("(list (and #t #f) (and #t #t) (or #t #f) (or #f #f) (or #t #f #t))").to_string(),
        "(#f #t #t #f #t)"
    );
    assert_eq!(run("(list (! #t) (not #t) (not #f) (! #f))").to_string(), "(#f #f #t #t)");
}

#[test]
fn equality() {
    assert_eq!(run("(list (= 1 2) (= 4 4) (== \"blub\" \"blub\") (== #t #f))").to_string(), "(#f #t #t #f)");
    assert_eq!(run("(do (def a ()) (== a ()))"), Value::bool(true));
    assert_eq!(run("(do (def a (list 1 2 3)) (def b (list 2 3 4)) (== a b))"), Value::bool(false));
    assert_eq!(run("(do (def a (list 1 2 3)) (def b (list 1 2 3)) (== a b))"), Value::bool(true));
    assert_eq!(run("(do (def a 7) (def b 7) (!= a b))"), Value::bool(false));
}

#[test]
fn comparisons() {
    assert_eq!(run("(list (< 1 2) (< 4 1) (> 5 2) (> 1 3) (> 4.0 4.0))").to_string(), "(#t #f #t #f #f)");
    assert_eq!(run("(do (def a \"abc\") (def b \"def\") (< a b))"), Value::bool(true));
    assert_eq!(run("(do (def a \"abc\") (def b \"abc\") (<= a b))"), Value::bool(true));
    assert_eq!(
        run("(list (<= 1 2) (<= 4 1) (>= 5 2) (>= 1 3) (>= 4.0 4.0) (<= 42 42))").to_string(),
        "(#t #f #t #f #t #t)"
    );
}

#[test]
fn arithmetic() {
    assert_eq!(run("(+ 1 2 3 4)"), Value::int(10));
    assert_eq!(run("(+ 1.1 2.2 3.3 4.3)"), Value::double(10.9));
    assert_eq!(run("(* 3 8 2)"), Value::int(48));
    assert_eq!(run("(/ 1.0 2.0)"), Value::double(0.5));
    assert_eq!(run("(/ 10 2)"), Value::int(5));
    assert_eq!(run("(- 42 12 6)"), Value::int(24));
    assert_eq!(run("(- 42.5 0.5)"), Value::double(42.0));
}

#[test]
fn division_by_zero() {
    assert!(matches!(run_err("(/ 1 0)"), Error::RuntimeError(_)));
    let value = run("(/ 1 0.0)");
    assert_eq!(value.type_of(), ValueType::Double);
    assert!(value.as_double().unwrap().is_infinite());
}

#[test]
fn adding_function_to_list_is_invalid() {
    assert_eq!(
        run_err("(+ (list 1) car)"),
        Error::InvalidOperation { op: "+", left: ValueType::List, right: ValueType::Function }
    );
}

#[test]
fn calling_a_non_function_fails() {
    assert_eq!(run_err("(1 2)"), Error::RuntimeError("1 is not a function".to_string()));
}

#[test]
fn quasiquote_splicing() {
    assert_eq!(
        run("(do (def a '(42 99 102 \"hello\")) (def b 55) (println (type a)) (println (nth 3 `(1 2 3 ,@a))))")
            .to_string(),
        "42"
    );
    assert_eq!(run("(do (def a 42) (println `(1 2 3 ,a)))").to_string(), "(1 2 3 42)");
    assert_eq!(
        run("(do (def a 42) (def lst (list 6 8 12)) (println (quasiquote (1 2 3 ,a ,@lst))))").to_string(),
        "(1 2 3 42 6 8 12)"
    );
    assert_eq!(
        run("(do (def a 42) (def lst (list 6 8 12)) (println (quasiquote (1 2 3 ,a ,lst))))").to_string(),
        "(1 2 3 42 (6 8 12))"
    );
    assert_eq!(run("(do (def a 42) (println (quasiquote (1 2 3 ,(+ 3 a)))))").to_string(), "(1 2 3 45)");
    assert_eq!(run("(do (def args '(1 2 3)) `,(first args))"), Value::int(1));
    assert_eq!(run("(do `(b))").to_string(), "(b)");
    assert!(run("(do `a)").is_symbol_named("a"));
}

#[test]
fn quote() {
    assert_eq!(run("(do (def x 42) (println 'x))").to_string(), "x");
    assert_eq!(run("(do '(a b 6 x))").to_string(), "(a b 6 x)");
}

#[test]
fn map_and_apply() {
    assert_eq!(run("(map (lambda (x) (+ x 1)) '(1 2 3))").to_string(), "(2 3 4)");
    assert_eq!(run("(do (def f (lambda (x) (+ x x))) (apply f '(5)))"), Value::int(10));
    assert_eq!(run("(apply + '(5 6 7))"), Value::int(18));
}

#[test]
fn closures_capture_their_frame() {
    assert_eq!(
        run("(do (defn addx (delta) (lambda (x) (+ x delta))) (def addclosure (addx 41)) (println (addclosure 1)))")
            .to_string(),
        "42"
    );
    assert_eq!(
        run("(do (defn addConst (x a) (+ x a)) (def add2 (lambda (x) (addConst x 2))) (println (addConst 8 2)) (println (add2 4)))")
            .to_string(),
        "6"
    );
}

#[test]
fn scoping_is_lexical() {
    assert_eq!(
        run("(do (defn g (x) (do (+ x 2))) (defn f (x) (do (def i 7) (+ x 1 i (g 2)))) (println (f 1)))")
            .to_string(),
        "13"
    );
    assert_eq!(
        run_err("(do (defn g (x) (do (+ x 2 i))) (defn f (x) (do (def i 7) (+ x 1 i (g 2)))) (println (f 1)))"),
        Error::UnboundSymbol("i".to_string())
    );
}

#[test]
fn extra_arguments_are_visible_through_args() {
    let (result, output) = run_with_output("(do (defn f (x) (do (println \"count=\" (argscount)) (+ x x))) (f 5 6 7))");
    assert_eq!(result.unwrap(), Value::int(10));
    assert_eq!(output, "count= 3\n");
    assert_eq!(run("(do (defn f (x) (args)) (f 5 6 7))").to_string(), "(5 6 7)");
}

#[test]
fn missing_argument_is_an_error() {
    assert_eq!(
        run_err("(do (defn f (x y) (+ x y)) (f 1))"),
        Error::RuntimeError("function f expects 2 arguments, got 1".to_string())
    );
}

#[test]
fn tracing_records_steps() {
    let result = run("(do (trace #t) (println \"hello world\") (println (+ 9 8)) (gettrace))");
    let trace = result.to_string();
    assert!(trace.contains("--> println"));
    assert!(trace.contains("--> +"));

    let buffer = Rc::new(RefCell::new(Vec::<u8>::new()));
    let sink: Sink = buffer.clone();
    let scope = create_default_scope(sink);
    let value = eval("(do (def a 42) (print a))", Some(&scope), &EvalOptions::new().tracing(true)).unwrap();
    assert_eq!(value.to_string(), "42");
    assert_eq!(scope.resolve("a"), Some(Value::int(42)));
    assert!(!scope.trace_log().is_empty());
}

#[test]
fn compile_time_macros() {
    assert_eq!(
        run("(do (define-macro-expand blub (x y) (println x y)) (println (quote (1 2 3))) (blub 3 4))").to_string(),
        "3 4"
    );

    let nested = "(do
        (define-macro-expand first-macro (a b)
            (do (println \"first-macro\") (def i 1) (+ a b i)))
        (define-macro-expand second-macro (x y)
            (do (println \"second-macro\") (* x y (first-macro (+ x 1) (+ y 2)))))
        (def m (second-macro 4 3)))";
    let (result, output) = run_with_output(nested);
    assert_eq!(result.unwrap(), Value::int(132));
    assert!(output.contains("first-macro"));
    assert!(output.contains("second-macro"));

    let plain = "(do
        (define-macro-expand first-macro (a b) (do (def i 1) (+ a b i)))
        (define-macro-expand second-macro (x y) (do (* x y (first-macro x y))))
        (def m (second-macro 4 3)))";
    assert_eq!(run(plain), Value::int(96));
}

#[test]
fn runtime_macros() {
    let recursive = "(do
        (define-macro-eval first-macro (a b)
            (do (println \"first-macro\") (def i 1) (+ a b i)))
        (define-macro-eval second-macro (x y)
            (do (println \"second-macro\") (* x y (first-macro x (+ y 4)))))
        (def m (second-macro 4 3)))";
    let (result, output) = run_with_output(recursive);
    assert_eq!(result.unwrap(), Value::int(144));
    assert!(output.contains("first-macro"));

    let double = "(do
        (define-macro-eval first-macro (a b) (do (def i 1) (+ a b i)))
        (define-macro-eval second-macro (x y) (do (* x y)))
        (def m (second-macro 4 (first-macro 6 3))))";
    assert_eq!(run(double), Value::int(40));
}

#[test]
fn macros_versus_functions_for_setf() {
    assert_eq!(
        run("(do (def a 42) (define-macro-expand my-setf (x value) (setf x value)) (my-setf a (+ \"blub\" \"xyz\")) (println a))")
            .to_string(),
        "blubxyz"
    );
    assert_eq!(
        run("(do (def a 42) (defn my-setf (x value) (setf x value)) (my-setf a (+ 8 9)) (println a))").to_string(),
        "42"
    );
    assert_eq!(
        run("(do (def a 42) (define-macro-eval my-setf (x value) (setf x value)) (my-setf a (+ \"blub\" \"xyz\")) (println a))")
            .to_string(),
        "blubxyz"
    );
}

#[test]
fn quoted_forms_are_not_expanded() {
    assert_eq!(
        run("(do (define-macro-expand inc (x) (+ x 1)) (quote (inc 2)))").to_string(),
        "(inc 2)"
    );
}
