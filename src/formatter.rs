//! Source formatter.
//!
//! Renders parsed forms back into source text that reads back to the same
//! tree. [`format_value`] gives the compact single-line form; [`Formatter`]
//! breaks long forms over several lines with 2-space indentation.

use crate::error::Error;
use crate::reader::{tokenize, Parser};
use crate::value::Value;

/// Maximum line length before wrapping
const MAX_LINE_LENGTH: usize = 80;

const INDENT_WIDTH: usize = 2;

/// Renders `value` on a single line.
///
/// Quote forms are printed as lists, so `'x` comes back as `(quote x)`.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Nil { .. } => "nil".to_string(),
        Value::Bool { value: true, .. } => "#t".to_string(),
        Value::Bool { value: false, .. } => "#f".to_string(),
        Value::Int { value, .. } => value.to_string(),
        Value::Double { value, .. } => format_double(*value),
        Value::String { value, .. } => format!("\"{}\"", escape_string(value)),
        Value::Symbol { name, .. } => name.to_string(),
        Value::List { items, .. } => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("({})", inner.join(" "))
        }
        other => other.to_string(),
    }
}

/// Doubles always carry a decimal point so they read back as doubles.
fn format_double(value: f64) -> String {
    let s = value.to_string();
    if value.is_finite() && !s.contains('.') {
        format!("{}.0", s)
    } else {
        s
    }
}

fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ => result.push(c),
        }
    }
    result
}

/// Multi-line formatter for whole programs.
#[derive(Debug, Clone)]
pub struct Formatter {
    max_width: usize,
}

impl Default for Formatter {
    fn default() -> Self {
        Self { max_width: MAX_LINE_LENGTH }
    }
}

impl Formatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_width(max_width: usize) -> Self {
        Self { max_width }
    }

    /// Formats every top-level form of `source`, one per paragraph.
    /// Comments are not preserved.
    pub fn format_source(&self, source: &str) -> Result<String, Error> {
        let forms = Parser::new(tokenize(source, 0)?).parse_forms()?;
        let mut out: Vec<String> = forms.iter().map(|form| self.format(form)).collect();
        if !out.is_empty() {
            out.push(String::new());
        }
        Ok(out.join("\n"))
    }

    pub fn format(&self, value: &Value) -> String {
        self.format_at(value, 0)
    }

    fn format_at(&self, value: &Value, indent: usize) -> String {
        let single = format_value(value);
        if indent + single.len() <= self.max_width {
            return single;
        }
        match value {
            Value::List { items, .. } => {
                let items: Vec<&Value> = items.iter().collect();
                self.format_special_form(&items, indent)
                    .unwrap_or_else(|| self.format_multi_line(&items, indent))
            }
            _ => single,
        }
    }

    /// Head and first argument share the opening line; every other item
    /// goes on its own line aligned under the first argument.
    fn format_multi_line(&self, items: &[&Value], indent: usize) -> String {
        let head = format_value(items[0]);
        let align = indent + 1 + head.len() + 1;
        let mut result = format!("({}", head);

        for (i, item) in items.iter().enumerate().skip(1) {
            if i == 1 {
                result.push(' ');
            } else {
                result.push('\n');
                result.push_str(&" ".repeat(align));
            }
            result.push_str(&self.format_at(item, align));
        }

        result.push(')');
        result
    }

    /// Forms whose leading operands stay on the first line while the body
    /// is indented one step.
    fn format_special_form(&self, items: &[&Value], indent: usize) -> Option<String> {
        let name = match items[0] {
            Value::Symbol { name, .. } => name.clone(),
            _ => return None,
        };

        let kept = match &*name {
            "def" | "gdef" | "setf" | "if" | "while" | "fn" | "lambda" => 2,
            "defn" | "gdefn" | "define-macro" | "define-macro-expand" | "define-macro-eval" => 3,
            "do" | "begin" => 1,
            _ => return None,
        };
        if items.len() <= kept {
            return None;
        }

        let body_indent = indent + INDENT_WIDTH;
        let head: Vec<String> = items[..kept].iter().map(|v| format_value(v)).collect();
        let mut result = format!("({}", head.join(" "));
        for item in &items[kept..] {
            result.push('\n');
            result.push_str(&" ".repeat(body_indent));
            result.push_str(&self.format_at(item, body_indent));
        }
        result.push(')');
        Some(result)
    }
}
