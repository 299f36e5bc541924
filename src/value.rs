use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use itertools::Itertools;

use crate::env::{FrameLink, Scope};
use crate::error::{Error, EvalResult};
use crate::reader::Token;

/// Absolute tolerance used when comparing doubles.
pub const TOLERANCE: f64 = 1e-8;

/// Originating token of an AST node. Runtime values have none.
pub type Pos = Option<Rc<Token>>;

//===----------------------------------------------------------------------===//
// ValueType
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Undefined,
    Nil,
    Bool,
    Int,
    Double,
    String,
    List,
    Function,
    Symbol,
    NativeObject,
    Error,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

//===----------------------------------------------------------------------===//
// Function
//===----------------------------------------------------------------------===//

/// Builtins and special forms share one signature; special forms receive
/// their arguments unevaluated.
pub type NativeFn = fn(&[Value], &Scope) -> EvalResult;

pub enum Callable {
    Native(NativeFn),
    Lambda(Lambda),
}

pub struct Lambda {
    pub params: Vec<Rc<str>>,
    pub body: Value,
    /// Scope the lambda was defined in; becomes the lexical parent of each call frame.
    pub closure: FrameLink,
}

pub struct Function {
    pub name: Rc<str>,
    pub signature: Option<String>,
    pub special_form: bool,
    pub callable: Callable,
}

impl Function {
    pub fn native(name: &str, signature: &str, f: NativeFn) -> Self {
        Self {
            name: Rc::from(name),
            signature: Some(signature.to_string()),
            special_form: false,
            callable: Callable::Native(f),
        }
    }

    pub fn special_form(name: &str, signature: &str, f: NativeFn) -> Self {
        Self { special_form: true, ..Self::native(name, signature, f) }
    }

    pub fn lambda(name: &str, params: Vec<Rc<str>>, body: Value, closure: Scope) -> Self {
        let signature = format!("({} {})", name, params.iter().join(" "));
        Self {
            name: Rc::from(name),
            signature: Some(signature),
            special_form: false,
            callable: Callable::Lambda(Lambda { params, body, closure: closure.link() }),
        }
    }

    pub fn is_lambda(&self) -> bool {
        matches!(self.callable, Callable::Lambda(_))
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("special_form", &self.special_form)
            .finish()
    }
}

//===----------------------------------------------------------------------===//
// Value
//===----------------------------------------------------------------------===//

#[derive(Clone)]
pub enum Value {
    Undefined,
    Nil { token: Pos },
    Bool { value: bool, token: Pos },
    Int { value: i64, token: Pos },
    Double { value: f64, token: Pos },
    String { value: Rc<str>, token: Pos },
    List { items: Rc<Vec<Value>>, token: Pos },
    Function(Rc<Function>),
    Symbol { name: Rc<str>, token: Pos },
    NativeObject(Rc<dyn Any>),
    Error(Rc<str>),
}

impl Value {
    pub fn nil() -> Self {
        Value::Nil { token: None }
    }

    pub fn bool(value: bool) -> Self {
        Value::Bool { value, token: None }
    }

    pub fn int(value: i64) -> Self {
        Value::Int { value, token: None }
    }

    pub fn double(value: f64) -> Self {
        Value::Double { value, token: None }
    }

    pub fn string(value: impl Into<Rc<str>>) -> Self {
        Value::String { value: value.into(), token: None }
    }

    pub fn symbol(name: impl Into<Rc<str>>) -> Self {
        Value::Symbol { name: name.into(), token: None }
    }

    /// An empty vector becomes Nil, the unique empty list.
    pub fn list(items: Vec<Value>) -> Self {
        if items.is_empty() {
            Value::nil()
        } else {
            Value::List { items: Rc::new(items), token: None }
        }
    }

    pub fn function(f: Function) -> Self {
        Value::Function(Rc::new(f))
    }

    pub fn error(msg: impl Into<Rc<str>>) -> Self {
        Value::Error(msg.into())
    }

    pub fn type_of(&self) -> ValueType {
        match self {
            Value::Undefined => ValueType::Undefined,
            Value::Nil { .. } => ValueType::Nil,
            Value::Bool { .. } => ValueType::Bool,
            Value::Int { .. } => ValueType::Int,
            Value::Double { .. } => ValueType::Double,
            Value::String { .. } => ValueType::String,
            Value::List { .. } => ValueType::List,
            Value::Function(_) => ValueType::Function,
            Value::Symbol { .. } => ValueType::Symbol,
            Value::NativeObject(_) => ValueType::NativeObject,
            Value::Error(_) => ValueType::Error,
        }
    }

    pub fn token(&self) -> Option<&Rc<Token>> {
        match self {
            Value::Nil { token }
            | Value::Bool { token, .. }
            | Value::Int { token, .. }
            | Value::Double { token, .. }
            | Value::String { token, .. }
            | Value::List { token, .. }
            | Value::Symbol { token, .. } => token.as_ref(),
            _ => None,
        }
    }

    /// Re-attaches position metadata; runtime-only variants ignore it.
    pub fn with_token(self, pos: Pos) -> Self {
        match self {
            Value::Nil { .. } => Value::Nil { token: pos },
            Value::Bool { value, .. } => Value::Bool { value, token: pos },
            Value::Int { value, .. } => Value::Int { value, token: pos },
            Value::Double { value, .. } => Value::Double { value, token: pos },
            Value::String { value, .. } => Value::String { value, token: pos },
            Value::List { items, .. } => Value::List { items, token: pos },
            Value::Symbol { name, .. } => Value::Symbol { name, token: pos },
            other => other,
        }
    }

    pub fn line(&self) -> Option<usize> {
        self.token().map(|t| t.line)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil { .. })
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool { .. })
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Value::Int { .. })
    }

    pub fn is_double(&self) -> bool {
        matches!(self, Value::Double { .. })
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String { .. })
    }

    /// Nil is the empty list, so both Nil and List answer true.
    pub fn is_list(&self) -> bool {
        matches!(self, Value::List { .. } | Value::Nil { .. })
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, Value::Symbol { .. })
    }

    pub fn is_native_object(&self) -> bool {
        matches!(self, Value::NativeObject(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// True if this is the symbol `name`.
    pub fn is_symbol_named(&self, name: &str) -> bool {
        matches!(self, Value::Symbol { name: n, .. } if n.as_ref() == name)
    }

    //===------------------------------------------------------------------===//
    // Accessors
    //===------------------------------------------------------------------===//

    fn invalid_cast(&self, expected: &'static str) -> Error {
        Error::InvalidCast { expected, found: self.type_of() }
    }

    pub fn as_bool(&self) -> Result<bool, Error> {
        match self {
            Value::Bool { value, .. } => Ok(*value),
            other => Err(other.invalid_cast("bool")),
        }
    }

    pub fn as_int(&self) -> Result<i64, Error> {
        match self {
            Value::Int { value, .. } => Ok(*value),
            other => Err(other.invalid_cast("int")),
        }
    }

    pub fn as_double(&self) -> Result<f64, Error> {
        match self {
            Value::Double { value, .. } => Ok(*value),
            other => Err(other.invalid_cast("double")),
        }
    }

    pub fn as_str(&self) -> Result<&str, Error> {
        match self {
            Value::String { value, .. } => Ok(value),
            other => Err(other.invalid_cast("string")),
        }
    }

    pub fn as_symbol(&self) -> Result<&Rc<str>, Error> {
        match self {
            Value::Symbol { name, .. } => Ok(name),
            other => Err(other.invalid_cast("symbol")),
        }
    }

    pub fn as_list(&self) -> Result<&[Value], Error> {
        match self {
            Value::Nil { .. } => Ok(&[]),
            Value::List { items, .. } => Ok(items.as_slice()),
            other => Err(other.invalid_cast("list")),
        }
    }

    pub fn as_function(&self) -> Result<&Rc<Function>, Error> {
        match self {
            Value::Function(f) => Ok(f),
            other => Err(other.invalid_cast("function")),
        }
    }

    pub fn as_native_object(&self) -> Result<&Rc<dyn Any>, Error> {
        match self {
            Value::NativeObject(obj) => Ok(obj),
            other => Err(other.invalid_cast("native object")),
        }
    }

    //===------------------------------------------------------------------===//
    // Coercions
    //===------------------------------------------------------------------===//

    pub fn to_bool(&self) -> Result<bool, Error> {
        match self {
            Value::Bool { value, .. } => Ok(*value),
            Value::Int { value, .. } => Ok(*value != 0),
            Value::Double { value, .. } => Ok(value.abs() > TOLERANCE),
            other => Err(other.invalid_cast("bool")),
        }
    }

    pub fn to_int(&self) -> Result<i64, Error> {
        match self {
            Value::Bool { value, .. } => Ok(i64::from(*value)),
            Value::Int { value, .. } => Ok(*value),
            Value::Double { value, .. } => Ok(*value as i64),
            Value::String { value, .. } => {
                value.trim().parse().map_err(|_| self.invalid_cast("int"))
            }
            other => Err(other.invalid_cast("int")),
        }
    }

    pub fn to_double(&self) -> Result<f64, Error> {
        match self {
            Value::Bool { value, .. } => Ok(if *value { 1.0 } else { 0.0 }),
            Value::Int { value, .. } => Ok(*value as f64),
            Value::Double { value, .. } => Ok(*value),
            Value::String { value, .. } => {
                value.trim().parse().map_err(|_| self.invalid_cast("double"))
            }
            other => Err(other.invalid_cast("double")),
        }
    }

    /// Condition semantics for `if`, `while`, `and`, `or` and `not`.
    /// Nil and Undefined are false; non-numeric values are true.
    pub fn is_true(&self) -> bool {
        match self {
            Value::Nil { .. } | Value::Undefined => false,
            Value::Bool { .. } | Value::Int { .. } | Value::Double { .. } => {
                self.to_bool().unwrap_or(false)
            }
            _ => true,
        }
    }

    //===------------------------------------------------------------------===//
    // Operators
    //===------------------------------------------------------------------===//

    pub fn add(&self, other: &Value) -> Result<Value, Error> {
        match promote("+", self, other, true)? {
            Promoted::Str(l, r) => Ok(Value::string(l + &r)),
            Promoted::Double(l, r) => Ok(Value::double(l + r)),
            Promoted::Int(l, r) => l.checked_add(r).map(Value::int).ok_or_else(overflow),
            Promoted::Other => match (self, other) {
                (l, r) if l.is_list() && r.is_list() => {
                    let mut items = l.as_list()?.to_vec();
                    items.extend_from_slice(r.as_list()?);
                    Ok(Value::list(items))
                }
                (l, r) => Err(invalid_operation("+", l, r)),
            },
        }
    }

    pub fn sub(&self, other: &Value) -> Result<Value, Error> {
        match promote("-", self, other, false)? {
            Promoted::Double(l, r) => Ok(Value::double(l - r)),
            Promoted::Int(l, r) => l.checked_sub(r).map(Value::int).ok_or_else(overflow),
            _ => Err(invalid_operation("-", self, other)),
        }
    }

    pub fn mul(&self, other: &Value) -> Result<Value, Error> {
        match promote("*", self, other, false)? {
            Promoted::Double(l, r) => Ok(Value::double(l * r)),
            Promoted::Int(l, r) => l.checked_mul(r).map(Value::int).ok_or_else(overflow),
            _ => Err(invalid_operation("*", self, other)),
        }
    }

    /// Double division follows IEEE semantics; integer division by zero fails.
    pub fn div(&self, other: &Value) -> Result<Value, Error> {
        match promote("/", self, other, false)? {
            Promoted::Double(l, r) => Ok(Value::double(l / r)),
            Promoted::Int(_, 0) => Err(Error::runtime("integer division by zero")),
            Promoted::Int(l, r) => l.checked_div(r).map(Value::int).ok_or_else(overflow),
            _ => Err(invalid_operation("/", self, other)),
        }
    }

    pub fn compare(&self, op: &'static str, other: &Value) -> Result<Ordering, Error> {
        match promote(op, self, other, true)? {
            Promoted::Str(l, r) => Ok(l.cmp(&r)),
            Promoted::Double(l, r) => {
                l.partial_cmp(&r).ok_or_else(|| invalid_operation(op, self, other))
            }
            Promoted::Int(l, r) => Ok(l.cmp(&r)),
            Promoted::Other => Err(invalid_operation(op, self, other)),
        }
    }

    pub fn lt(&self, other: &Value) -> Result<bool, Error> {
        Ok(self.compare("<", other)? == Ordering::Less)
    }

    pub fn le(&self, other: &Value) -> Result<bool, Error> {
        Ok(self.compare("<=", other)? != Ordering::Greater)
    }

    pub fn gt(&self, other: &Value) -> Result<bool, Error> {
        other.lt(self)
    }

    pub fn ge(&self, other: &Value) -> Result<bool, Error> {
        other.le(self)
    }

    /// The `==` operator. Doubles compare within [`TOLERANCE`].
    pub fn equal_op(&self, other: &Value) -> Result<bool, Error> {
        if self.is_double() || other.is_double() {
            let (l, r) = both(self, other, "==", Value::to_double)?;
            return Ok((l - r).abs() < TOLERANCE);
        }
        if self.is_int() || other.is_int() {
            let (l, r) = both(self, other, "==", Value::to_int)?;
            return Ok(l == r);
        }
        match (self, other) {
            (Value::Bool { value: l, .. }, Value::Bool { value: r, .. }) => Ok(l == r),
            (l, r) if l.is_string() || r.is_string() => Ok(l.to_string() == r.to_string()),
            (l, r) if l.is_list() && r.is_list() => Ok(l == r),
            (Value::Symbol { name: l, .. }, Value::Symbol { name: r, .. }) => Ok(l == r),
            (Value::Undefined, Value::Undefined) => Ok(true),
            (l, r) => Err(invalid_operation("==", l, r)),
        }
    }
}

enum Promoted {
    Str(String, String),
    Double(f64, f64),
    Int(i64, i64),
    Other,
}

/// Binary operator coercion: String beats Double beats Int.
fn promote(op: &'static str, l: &Value, r: &Value, strings: bool) -> Result<Promoted, Error> {
    if strings && (l.is_string() || r.is_string()) {
        return Ok(Promoted::Str(l.to_string(), r.to_string()));
    }
    if l.is_double() || r.is_double() {
        let (l, r) = both(l, r, op, Value::to_double)?;
        return Ok(Promoted::Double(l, r));
    }
    if l.is_int() || r.is_int() {
        let (l, r) = both(l, r, op, Value::to_int)?;
        return Ok(Promoted::Int(l, r));
    }
    Ok(Promoted::Other)
}

fn both<T>(
    l: &Value,
    r: &Value,
    op: &'static str,
    convert: fn(&Value) -> Result<T, Error>,
) -> Result<(T, T), Error> {
    match (convert(l), convert(r)) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        _ => Err(invalid_operation(op, l, r)),
    }
}

fn invalid_operation(op: &'static str, l: &Value, r: &Value) -> Error {
    Error::InvalidOperation { op, left: l.type_of(), right: r.type_of() }
}

fn overflow() -> Error {
    Error::runtime("integer overflow")
}

//===----------------------------------------------------------------------===//
// Traits
//===----------------------------------------------------------------------===//

/// Structural equality that ignores position metadata.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Nil { .. }, Value::Nil { .. }) => true,
            (Value::Bool { value: a, .. }, Value::Bool { value: b, .. }) => a == b,
            (Value::Int { value: a, .. }, Value::Int { value: b, .. }) => a == b,
            (Value::Double { value: a, .. }, Value::Double { value: b, .. }) => {
                (a - b).abs() < TOLERANCE
            }
            (Value::String { value: a, .. }, Value::String { value: b, .. }) => a == b,
            (Value::List { items: a, .. }, Value::List { items: b, .. }) => a == b,
            (Value::Symbol { name: a, .. }, Value::Symbol { name: b, .. }) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::NativeObject(a), Value::NativeObject(b)) => Rc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "<undefined>"),
            Value::Nil { .. } => write!(f, "nil"),
            Value::Bool { value, .. } => write!(f, "{}", if *value { "#t" } else { "#f" }),
            Value::Int { value, .. } => write!(f, "{}", value),
            Value::Double { value, .. } => write!(f, "{}", value),
            Value::String { value, .. } => write!(f, "{}", value),
            Value::List { items, .. } => write!(f, "({})", items.iter().map(Element).join(" ")),
            Value::Function(func) => match &func.signature {
                Some(sig) => write!(f, "function {}", sig),
                None => write!(f, "function <unknown>"),
            },
            Value::Symbol { name, .. } => write!(f, "{}", name),
            Value::NativeObject(_) => write!(f, "NativeObject"),
            Value::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// A list element; strings keep their quotes so element boundaries stay visible.
struct Element<'a>(&'a Value);

impl fmt::Display for Element<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Value::String { value, .. } => write!(f, "\"{}\"", value),
            other => write!(f, "{}", other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::String { value, .. } => write!(f, "String({:?})", value),
            Value::List { items, .. } => f.debug_tuple("List").field(items).finish(),
            other => write!(f, "{}({})", other.type_of(), other),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::string(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_plus_double_promotes_to_double() {
        let result = Value::int(1).add(&Value::double(2.5)).unwrap();
        assert_eq!(result.type_of(), ValueType::Double);
        assert_eq!(result.as_double().unwrap(), 3.5);

        let result = Value::int(1).add(&Value::int(2)).unwrap();
        assert_eq!(result.type_of(), ValueType::Int);
        assert_eq!(result.as_int().unwrap(), 3);
    }

    #[test]
    fn string_wins_coercion() {
        let result = Value::int(1).add(&Value::string("x")).unwrap();
        assert_eq!(result.as_str().unwrap(), "1x");
        assert!(Value::string("abc").lt(&Value::string("def")).unwrap());
    }

    #[test]
    fn doubles_are_equal_within_tolerance() {
        let a = Value::double(0.1 + 0.2);
        let b = Value::double(0.3);
        assert!(a.equal_op(&b).unwrap());
        assert!(!Value::double(0.3).equal_op(&Value::double(0.3001)).unwrap());
        assert!(Value::int(2).equal_op(&Value::double(2.000000001)).unwrap());
    }

    #[test]
    fn incompatible_tags_fail_with_both_names() {
        let f = Value::function(Function::native("nop", "(nop)", |_, _| Ok(Value::Undefined)));
        let list = Value::list(vec![Value::int(1)]);
        match list.add(&f) {
            Err(Error::InvalidOperation { op, left, right }) => {
                assert_eq!(op, "+");
                assert_eq!(left, ValueType::List);
                assert_eq!(right, ValueType::Function);
            }
            other => panic!("expected InvalidOperation, got {:?}", other),
        }
    }

    #[test]
    fn lists_concatenate_and_nil_is_empty_list() {
        let l = Value::list(vec![Value::int(1)]);
        let joined = l.add(&Value::nil()).unwrap();
        assert_eq!(joined, Value::list(vec![Value::int(1)]));
        assert!(Value::nil().is_list());
        assert!(Value::list(vec![]).is_nil());
    }

    #[test]
    fn division_rules() {
        let inf = Value::int(1).div(&Value::double(0.0)).unwrap();
        assert!(inf.as_double().unwrap().is_infinite());
        assert!(matches!(
            Value::int(1).div(&Value::int(0)),
            Err(Error::RuntimeError(_))
        ));
        assert_eq!(Value::int(7).div(&Value::int(2)).unwrap(), Value::int(3));
    }

    #[test]
    fn accessors_report_invalid_cast() {
        match Value::string("a").as_int() {
            Err(Error::InvalidCast { expected, found }) => {
                assert_eq!(expected, "int");
                assert_eq!(found, ValueType::String);
            }
            other => panic!("expected InvalidCast, got {:?}", other),
        }
        assert_eq!(Value::nil().as_list().unwrap().len(), 0);
    }

    #[test]
    fn display_forms() {
        let list = Value::list(vec![Value::int(1), Value::string("a"), Value::bool(true)]);
        assert_eq!(list.to_string(), "(1 \"a\" #t)");
        let nested = Value::list(vec![Value::string("hello world"), Value::list(vec![Value::string("x")])]);
        assert_eq!(nested.to_string(), "(\"hello world\" (\"x\"))");
        assert_eq!(Value::error("boom").to_string(), "Error: boom");
        assert_eq!(Value::Undefined.to_string(), "<undefined>");
    }
}
