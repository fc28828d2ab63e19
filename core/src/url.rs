//! Path parameter substitution for templated endpoint URLs.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

/// Characters left unescaped in a path segment (RFC 3986 unreserved).
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Replace `{name}` and `:name` placeholders with fields of `params`.
///
/// `:name` only counts at the start of a path segment, so schemes and ports
/// are left alone. Placeholders without a matching string, number or bool
/// field stay in the URL untouched.
pub fn substitute_path_params(template: &str, params: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(|c: char| c == '{' || c == ':') {
        let (head, tail) = rest.split_at(start);
        out.push_str(head);

        if tail.starts_with('{') {
            let Some(end) = tail.find('}') else {
                out.push_str(tail);
                rest = "";
                break;
            };
            match param_value(params, &tail[1..end]) {
                Some(value) => out.push_str(&value),
                None => out.push_str(&tail[..=end]),
            }
            rest = &tail[end + 1..];
            continue;
        }

        let end = tail[1..]
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .map_or(tail.len(), |i| i + 1);
        let name = &tail[1..end];
        let value = if out.ends_with('/') && !name.is_empty() {
            param_value(params, name)
        } else {
            None
        };
        match value {
            Some(value) => {
                out.push_str(&value);
                rest = &tail[end..];
            }
            None => {
                out.push(':');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn param_value(params: &Value, name: &str) -> Option<String> {
    let raw = match params.get(name)? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    Some(utf8_percent_encode(&raw, SEGMENT).to_string())
}
