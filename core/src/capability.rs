//! Capability model
//!
//! A capability is an unordered `{key -> value}` map describing what a
//! replica can serve. A query matches an offer when every key/value pair of
//! the query appears in the offer (subset match). The local model registry's
//! `(name, version)` pair is the two-key special case produced by
//! [`Capability::for_model`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capability key used for the model name.
pub const MODEL_KEY: &str = "model";

/// Capability key used for the model version.
pub const VERSION_KEY: &str = "version";

/// An unordered set of key/value attributes, used both as an offer
/// (what a replica serves) and as a query (what a request needs).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(BTreeMap<String, String>);

impl Capability {
    /// Create an empty capability.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capability for a `(model_name, model_version)` pair; an empty
    /// version means "any" and is omitted from the map.
    pub fn for_model(name: &str, version: &str) -> Self {
        let mut cap = Self::new().with(MODEL_KEY, name);
        if !version.is_empty() {
            cap.insert(VERSION_KEY, version);
        }
        cap
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert an attribute, replacing any previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Get an attribute value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// True when this offer satisfies `query`: every key in the query is
    /// present here with the same value.
    pub fn satisfies(&self, query: &Capability) -> bool {
        query
            .0
            .iter()
            .all(|(key, value)| self.0.get(key) == Some(value))
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over attributes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for Capability {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        write!(f, "{{")?;
        for (key, value) in &self.0 {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subset_query_matches() {
        let offer = Capability::new()
            .with("type", "chat")
            .with("model", "llama-70b");

        assert!(offer.satisfies(&Capability::new().with("type", "chat")));
        assert!(offer.satisfies(&Capability::new().with("model", "llama-70b")));
        assert!(offer.satisfies(
            &Capability::new()
                .with("type", "chat")
                .with("model", "llama-70b")
        ));
    }

    #[test]
    fn missing_or_mismatched_key_does_not_match() {
        let offer = Capability::new().with("type", "chat");

        assert!(!offer.satisfies(&Capability::new().with("type", "embed")));
        assert!(!offer.satisfies(&Capability::new().with("gpus", "2")));
    }

    #[test]
    fn empty_query_matches_any_offer() {
        let offer = Capability::new().with("type", "chat");
        assert!(offer.satisfies(&Capability::new()));
    }

    #[test]
    fn query_larger_than_offer_does_not_match() {
        let offer = Capability::new().with("type", "chat");
        let query = Capability::new().with("type", "chat").with("gpus", "2");
        assert!(!offer.satisfies(&query));
    }

    #[test]
    fn for_model_omits_empty_version() {
        let cap = Capability::for_model("classifier", "");
        assert_eq!(cap.get(MODEL_KEY), Some("classifier"));
        assert_eq!(cap.get(VERSION_KEY), None);

        let cap = Capability::for_model("classifier", "v1");
        assert_eq!(cap.get(VERSION_KEY), Some("v1"));
    }

    #[test]
    fn serializes_as_plain_map() {
        let cap = Capability::new().with("type", "embed");
        let json = serde_json::to_string(&cap).unwrap();
        assert_eq!(json, r#"{"type":"embed"}"#);

        let parsed: Capability = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cap);
    }
}
