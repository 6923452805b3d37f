//! A thin accessor layer over `serde_json::Value` that tracks the path it
//! took to reach a value. Conversion diagnostics quote this path (e.g.
//! `protocolApplied[0].targetDisease[0].coding[?(system==...)].code`) so
//! that a failure can be traced back to the exact place in the original
//! resource, without modelling the whole of FHIR as a typed struct tree
//! (real submissions routinely omit or malform individual fields, and a
//! single bad field must never fail the whole extraction).

use serde_json::Value;

#[derive(Clone, Copy)]
pub struct Json<'a> {
    value: &'a Value,
    path: &'a str,
}

/// Owned variant returned by accessors that need to build a new path
/// segment; borrows the underlying `Value` but owns its path string.
pub struct JsonOwned<'a> {
    value: &'a Value,
    path: String,
}

impl<'a> JsonOwned<'a> {
    pub fn as_ref(&self) -> Json<'_> {
        Json {
            value: self.value,
            path: &self.path,
        }
    }
}

static NULL: Value = Value::Null;

impl<'a> Json<'a> {
    pub fn root(value: &'a Value) -> Self {
        Json { value, path: "$" }
    }

    pub fn path(&self) -> &str {
        self.path
    }

    pub fn value(&self) -> &'a Value {
        self.value
    }

    pub fn is_absent(&self) -> bool {
        self.value.is_null()
    }

    pub fn get(&self, field: &'static str) -> JsonOwned<'a> {
        let child = self.value.get(field).unwrap_or(&NULL);
        JsonOwned {
            value: child,
            path: format!("{}.{field}", self.path),
        }
    }

    pub fn index(&self, i: usize) -> JsonOwned<'a> {
        let child = self.value.get(i).unwrap_or(&NULL);
        JsonOwned {
            value: child,
            path: format!("{}[{i}]", self.path),
        }
    }

    /// Annotates a derived path for an element picked out of an array by a
    /// predicate rather than an index, matching the `[?(...)]` convention
    /// used in diagnostics.
    pub fn filtered(&self, value: &'a Value, predicate_description: &str) -> Json<'a> {
        // Leaked once per lookup; conversion errors are rare enough that
        // this is not worth a lifetime-threaded arena.
        let path = Box::leak(format!("{}[?({predicate_description})]", self.path).into_boxed_str());
        Json { value, path }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        self.value.as_str().filter(|s| !s.is_empty())
    }

    pub fn as_str_allow_empty(&self) -> Option<&'a str> {
        self.value.as_str()
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }

    pub fn as_array(&self) -> Option<&'a Vec<Value>> {
        self.value.as_array().filter(|a| !a.is_empty())
    }

    pub fn as_number(&self) -> Option<&'a serde_json::Number> {
        self.value.as_number()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tracks_field_and_index_paths() {
        let v = json!({"a": [{"b": "x"}]});
        let root = Json::root(&v);
        let a0 = root.get("a");
        let a0b = a0.as_ref().index(0);
        assert_eq!(a0b.as_ref().get("b").as_ref().path(), "$.a[0].b");
        assert_eq!(a0b.as_ref().get("b").as_ref().as_str(), Some("x"));
    }

    #[test]
    fn missing_field_is_absent_not_an_error() {
        let v = json!({});
        let root = Json::root(&v);
        assert!(root.get("missing").as_ref().is_absent());
        assert_eq!(root.get("missing").as_ref().as_str(), None);
    }
}
