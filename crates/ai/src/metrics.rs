use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Named evaluation results (e.g. `loss`, `mean_absolute_error`).
///
/// Keys are kept sorted so the JSON form is stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(BTreeMap<String, f64>);

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// JSON object form stored on the artifact row.
    ///
    /// Non-finite values have no JSON representation and become `null`.
    pub fn to_json(&self) -> JsonValue {
        let map = self
            .0
            .iter()
            .map(|(k, v)| {
                let value = serde_json::Number::from_f64(*v)
                    .map(JsonValue::Number)
                    .unwrap_or(JsonValue::Null);
                (k.clone(), value)
            })
            .collect();
        JsonValue::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_form_is_a_flat_object() {
        let m = Metrics::new().with("loss", 0.5).with("mean_absolute_error", 0.25);
        assert_eq!(m.to_json(), json!({"loss": 0.5, "mean_absolute_error": 0.25}));
    }

    #[test]
    fn non_finite_values_become_null() {
        let m = Metrics::new().with("loss", f64::NAN);
        assert_eq!(m.to_json(), json!({"loss": null}));
    }
}
