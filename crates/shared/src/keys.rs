use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::ViewName;

/// Cache identity of a view instance: the view name plus the canonical JSON
/// encoding of its parameters. `serde_json::Value` keeps object members in a
/// sorted map, so two parameter values that compare equal always encode to
/// the same key regardless of construction order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewKey(pub String);

impl ViewKey {
    pub fn new(name: &ViewName, params: &serde_json::Value) -> Self {
        if params.is_null() {
            Self(name.0.clone())
        } else {
            // Value serialization is infallible for tree-shaped data.
            let encoded = serde_json::to_string(params).unwrap_or_default();
            Self(format!("{}_{}", name.0, encoded))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_params_encode_to_identical_keys() {
        let name = ViewName::from("ListingView");
        let a = ViewKey::new(&name, &json!({ "id": "42", "sort": "price" }));
        let b = ViewKey::new(&name, &json!({ "sort": "price", "id": "42" }));
        assert_eq!(a, b);
    }

    #[test]
    fn different_params_encode_to_distinct_keys() {
        let name = ViewName::from("ListingView");
        let a = ViewKey::new(&name, &json!({ "id": "42" }));
        let b = ViewKey::new(&name, &json!({ "id": "43" }));
        assert_ne!(a, b);
    }

    #[test]
    fn null_params_use_the_bare_name() {
        let name = ViewName::from("HomeView");
        assert_eq!(ViewKey::new(&name, &serde_json::Value::Null).as_str(), "HomeView");
    }
}
