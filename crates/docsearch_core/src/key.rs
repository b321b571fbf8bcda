use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use url::form_urlencoded;

/// Deterministic identity of a logical request, shared by the cache and the
/// in-flight registry.
///
/// Rendered as `METHOD path?a=1&b=2#{"body":...}`. Parameters are ordered by
/// name and form-encoded, and JSON bodies are serialized with sorted object keys, so two
/// requests that differ only in insertion order produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationKey(String);

impl OperationKey {
    pub fn builder(method: &str, path: &str) -> OperationKeyBuilder {
        OperationKeyBuilder {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            params: BTreeMap::new(),
            body: None,
        }
    }

    /// Key for content addressed by a digest rather than by its parameters.
    pub fn content(method: &str, path: &str, digest: &str) -> Self {
        Self(format!("{} {}#{}", method.to_ascii_uppercase(), path, digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix shared by every key for `method path`, regardless of parameters.
    pub fn prefix(method: &str, path: &str) -> String {
        format!("{} {}", method.to_ascii_uppercase(), path)
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct OperationKeyBuilder {
    method: String,
    path: String,
    params: BTreeMap<String, String>,
    body: Option<String>,
}

impl OperationKeyBuilder {
    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn params<'a>(mut self, pairs: impl IntoIterator<Item = &'a (String, String)>) -> Self {
        for (name, value) in pairs {
            self.params.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn body(mut self, body: &Value) -> Self {
        // serde_json's default map is ordered by key, so this is canonical.
        self.body = Some(body.to_string());
        self
    }

    pub fn build(self) -> OperationKey {
        let mut key = format!("{} {}", self.method, self.path);
        if !self.params.is_empty() {
            let mut query = form_urlencoded::Serializer::new(String::new());
            for (name, value) in &self.params {
                query.append_pair(name, value);
            }
            key.push('?');
            key.push_str(&query.finish());
        }
        if let Some(body) = self.body {
            key.push('#');
            key.push_str(&body);
        }
        OperationKey(key)
    }
}
