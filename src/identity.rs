//! Identity keys for rate budgets.
//!
//! A budget is scoped by who is calling (`context_identity`, produced by the limiter's
//! `identify_context` function) and by what is being called (`field_identity`, the operation
//! name plus the values of any selected arguments).
//!
//! Selected values are projected to strings before joining, so values with equal string
//! projections share a budget: `null` and a missing argument both become `""`, and the number
//! `2` collides with the string `"2"`.

use serde_json::Value;
use std::fmt;

/// Separator between the operation name and each resolved argument value.
pub const FIELD_IDENTITY_DELIMITER: char = ':';

/// The (caller, operation + args) compound key scoping one rate budget.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub context_identity: String,
    pub field_identity: String,
}

impl Identity {
    pub fn new(context_identity: impl Into<String>, field_identity: impl Into<String>) -> Self {
        Self { context_identity: context_identity.into(), field_identity: field_identity.into() }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.context_identity, FIELD_IDENTITY_DELIMITER, self.field_identity)
    }
}

/// Build the field identity for one invocation.
///
/// With no identity args the result is exactly `field_name`. Otherwise each path is looked up
/// in `args` (see [`lookup`]) and the projected values are appended, in order, separated by
/// `:`. Missing values contribute an empty segment instead of failing:
///
/// ```
/// use serde_json::json;
/// use windowguard::identity::resolve_field_identity;
///
/// assert_eq!(resolve_field_identity("books", &["id", "title"], &json!({"id": 1, "title": "Foo"})), "books:1:Foo");
/// assert_eq!(resolve_field_identity("books", &["name", "bool"], &json!({})), "books::");
/// ```
pub fn resolve_field_identity<P: AsRef<str>>(field_name: &str, identity_args: &[P], args: &Value) -> String {
    let mut key = String::from(field_name);
    for path in identity_args {
        key.push(FIELD_IDENTITY_DELIMITER);
        if let Some(value) = lookup(args, path.as_ref()) {
            project_into(value, &mut key);
        }
    }
    key
}

/// Nested lookup of a dot-separated path such as `item.subItem.id` or `items[0].id`.
///
/// An exact top-level key wins over path traversal, so `{"a.b": 1}` resolves `a.b` to `1`.
/// Missing intermediate keys, out-of-range indices and traversal into scalars yield `None`.
pub fn lookup<'a>(args: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(direct) = args.as_object().and_then(|map| map.get(path)) {
        return Some(direct);
    }
    let mut current = args;
    for segment in path_segments(path) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(|c: char| c == '.' || c == '[' || c == ']')
        .map(|s| s.trim_matches(|c: char| c == '"' || c == '\''))
        .filter(|s| !s.is_empty())
}

/// String projection of a resolved argument value.
pub fn project(value: &Value) -> String {
    let mut out = String::new();
    project_into(value, &mut out);
    out
}

fn project_into(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else if let Some(f) = n.as_f64() {
                // integral floats print without a trailing ".0"
                if f.fract() == 0.0 && f.abs() < 1e21 {
                    out.push_str(&format!("{:.0}", f));
                } else {
                    out.push_str(&f.to_string());
                }
            }
        }
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                project_into(item, out);
            }
        }
        Value::Object(_) => out.push_str("[object Object]"),
    }
}
