//! Cache Key Templates
//!
//! A key template is literal text with placeholders that name call
//! arguments:
//!
//! | Form          | Meaning                                  |
//! |---------------|------------------------------------------|
//! | `{id}`        | argument `id`                            |
//! | `{#id}`       | same, expression-style reference         |
//! | `#{#id}`      | same, templated-expression style         |
//! | `{#user.id}`  | field `id` of argument `user`            |
//! | `{#ids.0}`    | first element of array argument `ids`    |
//! | `{{` / `}}`   | literal braces                           |
//!
//! Argument values render as their raw text for strings, their canonical
//! form for numbers and booleans, nothing for null, and compact JSON for
//! objects and arrays.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use super::args::CallArgs;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// Argument name followed by zero or more field/index steps
    Placeholder(Vec<String>),
}

/// Parsed cache key template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl KeyTemplate {
    /// Parse a template, rejecting unbalanced braces and empty placeholders
    pub fn parse(template: &str) -> Result<Self> {
        let parse_err = |reason: &str| Error::KeyTemplateParse {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(parse_err("unmatched '}'")),
                '#' if chars.peek() == Some(&'{') => {
                    // `#{...}` opens a placeholder just like `{...}`
                    chars.next();
                    let body = take_placeholder(&mut chars).ok_or_else(|| parse_err("unterminated placeholder"))?;
                    flush(&mut segments, &mut literal);
                    segments.push(Segment::Placeholder(parse_path(&body).map_err(|r| parse_err(&r))?));
                }
                '{' => {
                    let body = take_placeholder(&mut chars).ok_or_else(|| parse_err("unterminated placeholder"))?;
                    flush(&mut segments, &mut literal);
                    segments.push(Segment::Placeholder(parse_path(&body).map_err(|r| parse_err(&r))?));
                }
                other => literal.push(other),
            }
        }
        flush(&mut segments, &mut literal);

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    /// The template text as written
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Argument names referenced by placeholders, in order of appearance
    pub fn parameters(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(path) => path.first().map(String::as_str),
            Segment::Literal(_) => None,
        })
    }

    /// True when the template has no placeholders
    pub fn is_static(&self) -> bool {
        self.parameters().next().is_none()
    }

    /// Render the key for one call.
    ///
    /// Fails with [`Error::UnboundParameter`] when a placeholder names a
    /// missing argument or field, and with [`Error::EmptyKey`] when the
    /// rendered key is empty.
    pub fn resolve(&self, args: &CallArgs) -> Result<String> {
        let mut key = String::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => key.push_str(text),
                Segment::Placeholder(path) => {
                    let value = lookup(args, path).ok_or_else(|| Error::UnboundParameter {
                        template: self.source.clone(),
                        parameter: path.join("."),
                    })?;
                    render(value, &mut key);
                }
            }
        }

        if key.is_empty() {
            return Err(Error::EmptyKey(self.source.clone()));
        }
        Ok(key)
    }
}

impl FromStr for KeyTemplate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn flush(segments: &mut Vec<Segment>, literal: &mut String) {
    if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(literal)));
    }
}

/// Consume up to the closing brace; `None` if the template ends first
fn take_placeholder(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<String> {
    let mut body = String::new();
    for c in chars.by_ref() {
        if c == '}' {
            return Some(body);
        }
        body.push(c);
    }
    None
}

fn parse_path(body: &str) -> std::result::Result<Vec<String>, String> {
    let body = body.trim();
    let body = body.strip_prefix('#').unwrap_or(body);
    if body.is_empty() {
        return Err("empty placeholder".to_string());
    }

    body.split('.')
        .map(|step| {
            let step = step.trim();
            if step.is_empty() {
                Err(format!("empty path step in '{}'", body))
            } else if !step.chars().all(|c| c.is_alphanumeric() || c == '_') {
                Err(format!("invalid path step '{}'", step))
            } else {
                Ok(step.to_string())
            }
        })
        .collect()
}

fn lookup<'a>(args: &'a CallArgs, path: &[String]) -> Option<&'a Value> {
    let (name, rest) = path.split_first()?;
    rest.iter().try_fold(args.get(name)?, |value, step| match value {
        Value::Object(map) => map.get(step),
        Value::Array(items) => step.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn render(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Array(_) | Value::Object(_) => out.push_str(&value.to_string()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn args() -> CallArgs {
        CallArgs::new()
            .with_value("id", json!(42))
            .with_value("name", json!("ada"))
            .with_value("user", json!({"id": 7, "tags": ["a", "b"], "active": true}))
            .with_value("nothing", Value::Null)
    }

    #[test]
    fn test_placeholder_forms() {
        let args = args();
        for template in ["child:{id}", "child:{#id}", "child:#{#id}", "child:{ #id }"] {
            let key = KeyTemplate::parse(template).unwrap().resolve(&args).unwrap();
            assert_eq!(key, "child:42", "template {}", template);
        }
    }

    #[test]
    fn test_multiple_placeholders() {
        let template = KeyTemplate::parse("user:{#name}:{#id}").unwrap();
        assert_eq!(template.resolve(&args()).unwrap(), "user:ada:42");
        assert_eq!(template.parameters().collect::<Vec<_>>(), vec!["name", "id"]);
        assert!(!template.is_static());
    }

    #[test]
    fn test_dotted_paths() {
        let args = args();
        let resolve = |t: &str| KeyTemplate::parse(t).unwrap().resolve(&args).unwrap();

        assert_eq!(resolve("u:{#user.id}"), "u:7");
        assert_eq!(resolve("t:{#user.tags.1}"), "t:b");
        assert_eq!(resolve("a:{#user.active}"), "a:true");
        assert_eq!(resolve("tags:{#user.tags}"), r#"tags:["a","b"]"#);
    }

    #[test]
    fn test_escaped_braces_and_static() {
        let template = KeyTemplate::parse("{{literal}}:{id}").unwrap();
        assert_eq!(template.resolve(&args()).unwrap(), "{literal}:42");

        let fixed = KeyTemplate::parse("all-children").unwrap();
        assert!(fixed.is_static());
        assert_eq!(fixed.resolve(&CallArgs::new()).unwrap(), "all-children");
    }

    #[test]
    fn test_hash_without_brace_is_literal() {
        let template = KeyTemplate::parse("tag#1:{id}").unwrap();
        assert_eq!(template.resolve(&args()).unwrap(), "tag#1:42");
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["child:{id", "child:}", "child:{}", "child:{#}", "{a..b}", "{a-b}", "{#user.}"] {
            assert_matches!(
                KeyTemplate::parse(bad),
                Err(Error::KeyTemplateParse { .. }),
                "template {}",
                bad
            );
        }
    }

    #[test]
    fn test_unbound_parameter() {
        let template = KeyTemplate::parse("child:{#missing}").unwrap();
        assert_matches!(
            template.resolve(&args()),
            Err(Error::UnboundParameter { parameter, .. }) if parameter == "missing"
        );

        let field = KeyTemplate::parse("u:{#user.email}").unwrap();
        assert_matches!(
            field.resolve(&args()),
            Err(Error::UnboundParameter { parameter, .. }) if parameter == "user.email"
        );
    }

    #[test]
    fn test_empty_resolution() {
        assert_matches!(
            KeyTemplate::parse("").unwrap().resolve(&args()),
            Err(Error::EmptyKey(_))
        );
        assert_matches!(
            KeyTemplate::parse("{#nothing}").unwrap().resolve(&args()),
            Err(Error::EmptyKey(t)) if t == "{#nothing}"
        );

        let empty_string = CallArgs::new().with_value("id", json!(""));
        assert_matches!(
            KeyTemplate::parse("{id}").unwrap().resolve(&empty_string),
            Err(Error::EmptyKey(_))
        );
    }

    #[test]
    fn test_null_renders_empty_segment() {
        let template = KeyTemplate::parse("child:{#nothing}").unwrap();
        assert_eq!(template.resolve(&args()).unwrap(), "child:");
    }

    #[test]
    fn test_from_str_and_display() {
        let template: KeyTemplate = "child:{#id}".parse().unwrap();
        assert_eq!(template.to_string(), "child:{#id}");
        assert_eq!(template.source(), "child:{#id}");
    }
}
