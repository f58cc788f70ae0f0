//! Removal of sensitive fields from processed crash records.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key paths removed by [`Redactor::default`].
pub const DEFAULT_FORBIDDEN_KEYS: &[&str] = &[
    "url",
    "email",
    "user_id",
    "exploitability",
    "json_dump.sensitive",
    "upload_file_minidump_flash1.json_dump.sensitive",
    "upload_file_minidump_flash2.json_dump.sensitive",
    "upload_file_minidump_browser.json_dump.sensitive",
];

/// Deletes a configured set of dotted key paths from a JSON document.
///
/// `json_dump.sensitive` removes the `sensitive` key of the nested
/// `json_dump` object. Paths that do not exist are ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redactor {
    forbidden_keys: Vec<String>,
}

impl Redactor {
    /// Create a redactor for the given key paths.
    pub fn new<I, S>(forbidden_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            forbidden_keys: forbidden_keys.into_iter().map(Into::into).collect(),
        }
    }

    /// A shared redactor with the default key set.
    pub fn default_ref() -> &'static Redactor {
        static DEFAULT: OnceLock<Redactor> = OnceLock::new();
        DEFAULT.get_or_init(Redactor::default)
    }

    /// The key paths this redactor removes.
    pub fn forbidden_keys(&self) -> &[String] {
        &self.forbidden_keys
    }

    /// Remove every forbidden key path from `doc` in place.
    pub fn redact(&self, doc: &mut Map<String, Value>) {
        for key in &self.forbidden_keys {
            remove_path(doc, key);
        }
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(DEFAULT_FORBIDDEN_KEYS.iter().copied())
    }
}

fn remove_path(doc: &mut Map<String, Value>, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(child)) = doc.get_mut(head) {
                remove_path(child, rest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn removes_top_level_and_nested_keys() {
        let mut processed = doc(json!({
            "signature": "js::GC",
            "url": "https://example.com/private",
            "email": "someone@example.com",
            "json_dump": {"sensitive": {"registers": 1}, "threads": []},
        }));
        Redactor::default().redact(&mut processed);
        assert_eq!(
            Value::Object(processed),
            json!({"signature": "js::GC", "json_dump": {"threads": []}})
        );
    }

    #[test]
    fn missing_paths_are_ignored() {
        let mut processed = doc(json!({"json_dump": "not an object"}));
        Redactor::new(["json_dump.sensitive", "nope.deeper.still"]).redact(&mut processed);
        assert_eq!(Value::Object(processed), json!({"json_dump": "not an object"}));
    }

    #[test]
    fn custom_key_set() {
        let redactor = Redactor::new(["a.b"]);
        assert_eq!(redactor.forbidden_keys(), &["a.b".to_string()]);
        let mut processed = doc(json!({"a": {"b": 1, "c": 2}, "url": "kept"}));
        redactor.redact(&mut processed);
        assert_eq!(Value::Object(processed), json!({"a": {"c": 2}, "url": "kept"}));
    }
}
