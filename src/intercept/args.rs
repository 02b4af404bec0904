//! Call argument bindings
//!
//! Parameter name to value mapping for one intercepted call. Values are held
//! as JSON so key templates can reach into structured arguments
//! (`{#user.id}`).

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Ordered parameter-name -> argument-value bindings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    bindings: Vec<(String, Value)>,
}

impl CallArgs {
    /// Empty bindings
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to any serializable value
    pub fn bind<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Result<Self> {
        self.insert(name, serde_json::to_value(value)?);
        Ok(self)
    }

    /// Bind `name` to a JSON value
    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    /// Bind or rebind `name`
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.bindings.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.bindings.push((name, value)),
        }
    }

    /// Value bound to `name`
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Parameter names in binding order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Value)> for CallArgs {
    fn from_iter<I: IntoIterator<Item = (S, Value)>>(iter: I) -> Self {
        let mut args = CallArgs::new();
        for (name, value) in iter {
            args.insert(name, value);
        }
        args
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct User {
        id: u64,
        name: String,
    }

    #[test]
    fn test_bind_serializable() {
        let args = CallArgs::new()
            .bind("id", &42)
            .unwrap()
            .bind(
                "user",
                &User {
                    id: 7,
                    name: "ada".into(),
                },
            )
            .unwrap();

        assert_eq!(args.get("id"), Some(&json!(42)));
        assert_eq!(args.get("user"), Some(&json!({"id": 7, "name": "ada"})));
        assert_eq!(args.get("missing"), None);
        assert_eq!(args.names().collect::<Vec<_>>(), vec!["id", "user"]);
    }

    #[test]
    fn test_rebind_keeps_position() {
        let mut args = CallArgs::new()
            .with_value("a", json!(1))
            .with_value("b", json!(2));
        args.insert("a", json!(10));

        assert_eq!(args.len(), 2);
        assert_eq!(args.get("a"), Some(&json!(10)));
        assert_eq!(args.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_from_iterator() {
        let args: CallArgs = vec![("id", json!(1)), ("name", json!("x"))]
            .into_iter()
            .collect();

        assert_eq!(args.len(), 2);
        assert!(!args.is_empty());
        assert!(CallArgs::new().is_empty());
    }
}
