//! Minimal template renderer: replaces `{key}` placeholders in a single
//! pass, with `{{` / `}}` escaping to literal braces. Single-pass matters:
//! a substituted value containing `{other_key}` must not be expanded again.

use std::collections::HashMap;

use crate::error::Error;

const SENTINEL_L: &str = "\u{0}LBRACE\u{0}";
const SENTINEL_R: &str = "\u{0}RBRACE\u{0}";

/// Render a template string against a flat key→value map.
///
/// An unresolved `{key}` placeholder is an error; silently shipping a
/// deployment artifact with a literal `{gpu}` in it fails much later and
/// much more confusingly.
pub fn render(template: &str, replacements: &HashMap<String, String>) -> Result<String, Error> {
    let escaped = template.replace("{{", SENTINEL_L).replace("}}", SENTINEL_R);

    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped.as_str();
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder_key(&after[..close]) => {
                let key = &after[..close];
                let value = replacements.get(key).ok_or_else(|| {
                    Error::Template(format!("unresolved placeholder '{{{key}}}'"))
                })?;
                out.push_str(value);
                rest = &after[close + 1..];
            }
            _ => {
                // Not a placeholder (e.g. "{ " in shell text), keep the brace.
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);

    Ok(out.replace(SENTINEL_L, "{").replace(SENTINEL_R, "}"))
}

fn is_placeholder_key(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_basic_substitution() {
        let out = render("serve {model} --port {port}", &map(&[("model", "qwen"), ("port", "8001")]))
            .unwrap();
        assert_eq!(out, "serve qwen --port 8001");
    }

    #[test]
    fn test_unresolved_placeholder_is_error() {
        let err = render("serve {model}", &map(&[])).unwrap_err();
        assert!(err.to_string().contains("unresolved placeholder '{model}'"));
    }

    #[test]
    fn test_double_braces_are_literal() {
        let out = render("d = {{\"gpu\": \"{gpu}\"}}", &map(&[("gpu", "L4")])).unwrap();
        assert_eq!(out, "d = {\"gpu\": \"L4\"}");
    }

    #[test]
    fn test_value_containing_placeholder_not_reexpanded() {
        let out = render("{a}", &map(&[("a", "{b}"), ("b", "nope")])).unwrap();
        assert_eq!(out, "{b}");
    }

    #[test]
    fn test_non_placeholder_braces_kept() {
        let out = render("awk '{ print $1 }' {file}", &map(&[("file", "x.log")])).unwrap();
        assert_eq!(out, "awk '{ print $1 }' x.log");
    }
}
