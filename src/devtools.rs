use crate::value::Value;

/// Pretty-prints an AST one node per line, each tagged with its type and
/// the source line it came from.
///
/// ```text
/// List@1:(
///   Symbol@1:print
///   Int@2:42
/// )
/// ```
pub fn pretty_print_ast(value: &Value) -> String {
    let mut out = String::new();
    pretty_print_ast_with_indent(value, 0, &mut out);
    out
}

fn tag(value: &Value) -> String {
    match value.line() {
        Some(line) => format!("{}@{}", value.type_of(), line),
        None => value.type_of().to_string(),
    }
}

fn pretty_print_ast_with_indent(value: &Value, indent: usize, out: &mut String) {
    let indent_str = "  ".repeat(indent);
    out.push_str(&tag(value));
    out.push(':');

    match value {
        Value::String { value, .. } => {
            let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
            out.push_str(&format!("\"{}\"", escaped));
        }
        Value::List { items, .. } => {
            out.push_str("(\n");
            for item in items.iter() {
                out.push_str(&indent_str);
                out.push_str("  ");
                pretty_print_ast_with_indent(item, indent + 1, out);
                out.push('\n');
            }
            out.push_str(&indent_str);
            out.push(')');
        }
        other => out.push_str(&other.to_string()),
    }
}
