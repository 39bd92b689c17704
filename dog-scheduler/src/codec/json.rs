use serde::{de::DeserializeOwned, Serialize};

use crate::codec::FieldValue;

/// Nested serde value stored in a single field as compact JSON
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Serialize + DeserializeOwned> FieldValue for Json<T> {
    const TYPE_NAME: &'static str = "JSON document";

    fn to_field(&self) -> String {
        // Only non-string map keys make serialization fail; render those as null
        serde_json::to_string(&self.0).unwrap_or_else(|_| "null".to_string())
    }

    fn from_field(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok().map(Json)
    }
}
