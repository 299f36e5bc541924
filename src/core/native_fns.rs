use itertools::Itertools;

use crate::core::{expect_args, register};
use crate::env::Scope;
use crate::error::{Error, EvalResult};
use crate::eval::{apply, eval_ast};
use crate::expander::expand;
use crate::runtime::{self, EvalOptions};
use crate::value::Value;

//===----------------------------------------------------------------------===//
// Native Functions
//===----------------------------------------------------------------------===//

pub fn install(scope: &Scope) {
    register(scope, "+", "(+ expr1 expr2 ...)", add);
    register(scope, "-", "(- expr1 expr2 ...)", sub);
    register(scope, "*", "(* expr1 expr2 ...)", mul);
    register(scope, "/", "(/ expr1 expr2 ...)", div);
    register(scope, "<", "(< expr1 expr2 ...)", less);
    register(scope, ">", "(> expr1 expr2 ...)", greater);
    register(scope, "<=", "(<= expr1 expr2 ...)", less_equal);
    register(scope, ">=", "(>= expr1 expr2 ...)", greater_equal);
    register(scope, "==", "(== expr1 expr2 ...)", equal);
    register(scope, "=", "(= expr1 expr2 ...)", equal);
    register(scope, "!=", "(!= expr1 expr2)", not_equal);
    register(scope, "not", "(not expr)", not);
    register(scope, "!", "(! expr)", not);
    register(scope, "list", "(list item ...)", list);
    register(scope, "cons", "(cons item list)", cons);
    register(scope, "first", "(first list)", first);
    register(scope, "car", "(car list)", first);
    register(scope, "rest", "(rest list)", rest);
    register(scope, "cdr", "(cdr list)", rest);
    register(scope, "last", "(last list)", last);
    register(scope, "nth", "(nth index list)", nth);
    register(scope, "len", "(len list-or-string)", len);
    register(scope, "append", "(append list ...)", append);
    register(scope, "print", "(print expr ...)", print);
    register(scope, "println", "(println expr ...)", println);
    register(scope, "str", "(str expr ...)", str);
    register(scope, "sym", "(sym expr)", sym);
    register(scope, "type", "(type expr)", type_of);
    register(scope, "eval", "(eval ast)", eval);
    register(scope, "evalstr", "(evalstr source)", evalstr);
    register(scope, "apply", "(apply function list)", apply_fn);
    register(scope, "map", "(map function list)", map);
    register(scope, "trace", "(trace flag)", trace);
    register(scope, "gettrace", "(gettrace)", gettrace);
    register(scope, "args", "(args)", args);
    register(scope, "argscount", "(argscount)", argscount);
    register(scope, "nop", "(nop)", nop);
}

//===----------------------------------------------------------------------===//
// Arithmetic and comparison
//===----------------------------------------------------------------------===//

fn fold(
    name: &str,
    args: &[Value],
    op: fn(&Value, &Value) -> Result<Value, Error>,
) -> EvalResult {
    expect_args(name, args, 1)?;
    let mut acc = args[0].clone();
    for arg in &args[1..] {
        acc = op(&acc, arg)?;
    }
    Ok(acc)
}

/// `(+ a b ...)`: sum, string concatenation or list concatenation.
pub fn add(args: &[Value], _scope: &Scope) -> EvalResult {
    fold("+", args, Value::add)
}

/// `(- a b ...)`; a single argument is negated.
pub fn sub(args: &[Value], _scope: &Scope) -> EvalResult {
    if let [single] = args {
        return Ok(Value::int(0).sub(single)?);
    }
    fold("-", args, Value::sub)
}

pub fn mul(args: &[Value], _scope: &Scope) -> EvalResult {
    fold("*", args, Value::mul)
}

/// `(/ a b ...)`: integer division by zero fails, double division follows IEEE.
pub fn div(args: &[Value], _scope: &Scope) -> EvalResult {
    fold("/", args, Value::div)
}

/// Every adjacent pair must satisfy `test`.
fn chain(
    name: &str,
    args: &[Value],
    test: fn(&Value, &Value) -> Result<bool, Error>,
) -> EvalResult {
    expect_args(name, args, 2)?;
    for pair in args.windows(2) {
        if !test(&pair[0], &pair[1])? {
            return Ok(Value::bool(false));
        }
    }
    Ok(Value::bool(true))
}

pub fn less(args: &[Value], _scope: &Scope) -> EvalResult {
    chain("<", args, Value::lt)
}

pub fn greater(args: &[Value], _scope: &Scope) -> EvalResult {
    chain(">", args, Value::gt)
}

pub fn less_equal(args: &[Value], _scope: &Scope) -> EvalResult {
    chain("<=", args, Value::le)
}

pub fn greater_equal(args: &[Value], _scope: &Scope) -> EvalResult {
    chain(">=", args, Value::ge)
}

/// `(== a b ...)`: doubles compare within the value tolerance.
pub fn equal(args: &[Value], _scope: &Scope) -> EvalResult {
    chain("==", args, Value::equal_op)
}

pub fn not_equal(args: &[Value], _scope: &Scope) -> EvalResult {
    expect_args("!=", args, 2)?;
    Ok(Value::bool(!args[0].equal_op(&args[1])?))
}

pub fn not(args: &[Value], _scope: &Scope) -> EvalResult {
    expect_args("not", args, 1)?;
    Ok(Value::bool(!args[0].is_true()))
}

//===----------------------------------------------------------------------===//
// Lists
//===----------------------------------------------------------------------===//

pub fn list(args: &[Value], _scope: &Scope) -> EvalResult {
    Ok(Value::list(args.to_vec()))
}

/// `(cons item list)`: prepends `item`. A non-list tail yields a two-element list.
pub fn cons(args: &[Value], _scope: &Scope) -> EvalResult {
    expect_args("cons", args, 2)?;
    let mut items = vec![args[0].clone()];
    match args[1].as_list() {
        Ok(tail) => items.extend_from_slice(tail),
        Err(_) => items.push(args[1].clone()),
    }
    Ok(Value::list(items))
}

/// `(first list)`: nil for the empty list.
pub fn first(args: &[Value], _scope: &Scope) -> EvalResult {
    expect_args("first", args, 1)?;
    Ok(args[0].as_list()?.first().cloned().unwrap_or_else(Value::nil))
}

pub fn rest(args: &[Value], _scope: &Scope) -> EvalResult {
    expect_args("rest", args, 1)?;
    let items = args[0].as_list()?;
    Ok(Value::list(items.iter().skip(1).cloned().collect()))
}

pub fn last(args: &[Value], _scope: &Scope) -> EvalResult {
    expect_args("last", args, 1)?;
    Ok(args[0].as_list()?.last().cloned().unwrap_or_else(Value::nil))
}

/// `(nth index list)`: zero based; out of range is a runtime error.
pub fn nth(args: &[Value], _scope: &Scope) -> EvalResult {
    expect_args("nth", args, 2)?;
    let index = args[0].as_int()?;
    let items = args[1].as_list()?;
    usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i))
        .cloned()
        .ok_or_else(|| {
            Error::runtime(format!("index {} out of range for list of {}", index, items.len()))
                .into()
        })
}

pub fn len(args: &[Value], _scope: &Scope) -> EvalResult {
    expect_args("len", args, 1)?;
    let count = match &args[0] {
        Value::String { value, .. } => value.chars().count(),
        other => other.as_list()?.len(),
    };
    Ok(Value::int(count as i64))
}

pub fn append(args: &[Value], _scope: &Scope) -> EvalResult {
    let mut items = Vec::new();
    for arg in args {
        items.extend_from_slice(arg.as_list()?);
    }
    Ok(Value::list(items))
}

//===----------------------------------------------------------------------===//
// Output and conversion
//===----------------------------------------------------------------------===//

/// `(print expr ...)`: writes the arguments separated by spaces and returns the text.
pub fn print(args: &[Value], scope: &Scope) -> EvalResult {
    let text = args.iter().join(" ");
    scope.write_out(&text)?;
    Ok(Value::string(text))
}

pub fn println(args: &[Value], scope: &Scope) -> EvalResult {
    let text = args.iter().join(" ");
    scope.write_out(&format!("{}\n", text))?;
    Ok(Value::string(text))
}

pub fn str(args: &[Value], _scope: &Scope) -> EvalResult {
    Ok(Value::string(args.iter().join("")))
}

pub fn sym(args: &[Value], _scope: &Scope) -> EvalResult {
    expect_args("sym", args, 1)?;
    Ok(Value::symbol(args[0].to_string()))
}

/// `(type expr)`: the value's tag name, e.g. `"Int"`.
pub fn type_of(args: &[Value], _scope: &Scope) -> EvalResult {
    expect_args("type", args, 1)?;
    Ok(Value::string(args[0].type_of().to_string()))
}

//===----------------------------------------------------------------------===//
// Evaluation
//===----------------------------------------------------------------------===//

/// `(eval ast)`: expands and evaluates a quoted form in the calling frame.
pub fn eval(args: &[Value], scope: &Scope) -> EvalResult {
    expect_args("eval", args, 1)?;
    let ast = expand(args[0].clone(), scope)?;
    eval_ast(&ast, scope)
}

/// `(evalstr source)`: parses and evaluates source text in the calling frame.
pub fn evalstr(args: &[Value], scope: &Scope) -> EvalResult {
    expect_args("evalstr", args, 1)?;
    let source = args[0].as_str()?;
    runtime::eval(source, Some(scope), &EvalOptions::new().update_finished(false))
}

pub fn apply_fn(args: &[Value], scope: &Scope) -> EvalResult {
    expect_args("apply", args, 2)?;
    let func = args[0].as_function()?;
    apply(func, args[1].as_list()?.to_vec(), scope)
}

pub fn map(args: &[Value], scope: &Scope) -> EvalResult {
    expect_args("map", args, 2)?;
    let func = args[0].as_function()?;
    let items = args[1]
        .as_list()?
        .iter()
        .map(|item| apply(func, vec![item.clone()], scope))
        .collect::<EvalResult<Vec<_>>>()?;
    Ok(Value::list(items))
}

/// `(trace flag)`: switches step tracing; returns the new state.
pub fn trace(args: &[Value], scope: &Scope) -> EvalResult {
    expect_args("trace", args, 1)?;
    let on = args[0].is_true();
    scope.set_tracing(on);
    Ok(Value::bool(on))
}

/// `(gettrace)`: the steps recorded so far, one per line.
pub fn gettrace(_args: &[Value], scope: &Scope) -> EvalResult {
    Ok(Value::string(scope.trace_log().join("\n")))
}

/// `(args)`: every argument passed to the enclosing function, including extras.
pub fn args(_args: &[Value], scope: &Scope) -> EvalResult {
    Ok(Value::list(scope.args()))
}

pub fn argscount(_args: &[Value], scope: &Scope) -> EvalResult {
    Ok(Value::int(scope.args().len() as i64))
}

pub fn nop(_args: &[Value], _scope: &Scope) -> EvalResult {
    Ok(Value::Undefined)
}
