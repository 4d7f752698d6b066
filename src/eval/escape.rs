//! HTML escaping for rendered output.

use crate::ast::value::Value;

/// Escape the five HTML-significant characters.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Stringify a value for output under the given autoescape setting.
///
/// Markup is always emitted as-is.
pub(crate) fn render_value(value: &Value, autoescape: bool) -> String {
    match value {
        Value::Markup(s) => s.clone(),
        other if autoescape => html_escape(&other.to_output_string()),
        other => other.to_output_string(),
    }
}
