//! Filter canonicalization against a resource-specific alias table.
//!
//! Incoming filter keys arrive in whatever shape the model picked up from
//! conversation ("season", "Season No", "seasonNo"). The canonicalizer maps
//! them onto the resource's canonical keys; anything unknown is dropped
//! with a warning, never an error.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

/// Alias → canonical key table for one resource family.
#[derive(Debug, Default)]
pub struct FilterCanonicalizer {
    /// Lower-cased, whitespace-stripped alias → canonical key.
    aliases: HashMap<String, String>,
}

impl FilterCanonicalizer {
    /// Build a table from `(alias, canonical)` pairs. Canonical keys are
    /// implicitly aliases of themselves.
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut aliases = HashMap::new();
        for (alias, canonical) in pairs {
            aliases.insert(normalize(alias), (*canonical).to_owned());
            aliases.insert(normalize(canonical), (*canonical).to_owned());
        }
        Self { aliases }
    }

    /// Resolve one key to its canonical form.
    pub fn resolve(&self, key: &str) -> Option<&str> {
        self.aliases.get(&normalize(key)).map(String::as_str)
    }

    /// Canonicalize a raw `filters` object.
    ///
    /// Scalar values are stringified; array/object values are dropped with
    /// a warning, as are keys that resolve to nothing or to a key the tool
    /// does not accept.
    pub fn canonicalize(
        &self,
        raw: &serde_json::Map<String, Value>,
        allowed: &[String],
        warnings: &mut Vec<String>,
    ) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (key, value) in raw {
            let Some(canonical) = self.resolve(key) else {
                warnings.push(format!("filters: unknown key '{key}' dropped"));
                continue;
            };
            if !allowed.iter().any(|a| a.eq_ignore_ascii_case(canonical)) {
                warnings.push(format!("filters: key '{key}' not accepted by this tool"));
                continue;
            }
            let Some(text) = scalar_string(value) else {
                warnings.push(format!("filters: non-scalar value for '{key}' dropped"));
                continue;
            };
            out.insert(canonical.to_owned(), text);
        }
        out
    }
}

fn normalize(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .collect::<String>()
        .to_lowercase()
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
