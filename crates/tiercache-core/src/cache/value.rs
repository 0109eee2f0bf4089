//! Tagged cache values
//!
//! Every backend stores a JSON payload together with a [`ValueShape`] tag.
//! The tag is inferred when a value is encoded and validated when it is read
//! back, so callers can either decode through serde or match on the shape
//! with an explicit decode function.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::CacheError;

/// Structural shape of a cached payload
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueShape {
    /// A string, number, boolean or null
    Scalar,
    /// A sequence whose elements are not all mappings
    ScalarList,
    /// A non-empty sequence of mappings
    MapList,
    /// A key-value mapping
    Map,
}

impl ValueShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueShape::Scalar => "scalar",
            ValueShape::ScalarList => "scalar_list",
            ValueShape::MapList => "map_list",
            ValueShape::Map => "map",
        }
    }

    /// Infer the shape of a JSON value
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Object(_) => ValueShape::Map,
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
                ValueShape::MapList
            }
            Value::Array(_) => ValueShape::ScalarList,
            _ => ValueShape::Scalar,
        }
    }

    /// Whether a payload is compatible with this tag.
    ///
    /// An empty sequence is accepted by both list shapes.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueShape::Map, Value::Object(_)) => true,
            (ValueShape::MapList, Value::Array(items)) => items.iter().all(Value::is_object),
            (ValueShape::ScalarList, Value::Array(_)) => true,
            (ValueShape::Scalar, v) => !v.is_array() && !v.is_object(),
            _ => false,
        }
    }
}

impl fmt::Display for ValueShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueShape {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scalar" => Ok(ValueShape::Scalar),
            "scalar_list" => Ok(ValueShape::ScalarList),
            "map_list" => Ok(ValueShape::MapList),
            "map" => Ok(ValueShape::Map),
            _ => Err(CacheError::Decode(format!("unknown value type tag '{}'", s))),
        }
    }
}

/// A serialized payload plus its shape tag
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    shape: ValueShape,
    payload: Value,
}

impl CachedValue {
    /// Wrap a JSON payload, inferring its shape
    pub fn from_json(payload: Value) -> Self {
        Self {
            shape: ValueShape::of(&payload),
            payload,
        }
    }

    /// Serialize a value into a cached payload
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self, CacheError> {
        Ok(Self::from_json(serde_json::to_value(value)?))
    }

    /// Rebuild a value from its stored text and tag
    pub fn from_stored(text: &str, tag: &str) -> Result<Self, CacheError> {
        let shape: ValueShape = tag.parse()?;
        let payload: Value = serde_json::from_str(text)?;
        if !shape.accepts(&payload) {
            return Err(CacheError::Decode(format!(
                "payload does not match tag '{}'",
                shape
            )));
        }
        Ok(Self { shape, payload })
    }

    /// Stored text form of the payload
    pub fn to_text(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string(&self.payload)?)
    }

    pub fn shape(&self) -> ValueShape {
        self.shape
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// Deserialize into a caller-chosen type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CacheError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| CacheError::Decode(format!("{} payload: {}", self.shape, e)))
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        (self.shape == ValueShape::Scalar).then_some(&self.payload)
    }

    pub fn as_scalar_list(&self) -> Option<&[Value]> {
        match (&self.shape, &self.payload) {
            (ValueShape::ScalarList | ValueShape::MapList, Value::Array(items)) => Some(items),
            _ => None,
        }
    }

    pub fn as_map_list(&self) -> Option<Vec<&Map<String, Value>>> {
        match &self.payload {
            Value::Array(items) if self.shape.accepts(&self.payload) => {
                items.iter().map(Value::as_object).collect()
            }
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map<String, Value>> {
        match (&self.shape, &self.payload) {
            (ValueShape::Map, Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_shape_inference() {
        assert_eq!(ValueShape::of(&json!("episode")), ValueShape::Scalar);
        assert_eq!(ValueShape::of(&json!(null)), ValueShape::Scalar);
        assert_eq!(ValueShape::of(&json!([1, 2, 3])), ValueShape::ScalarList);
        assert_eq!(ValueShape::of(&json!([])), ValueShape::ScalarList);
        assert_eq!(ValueShape::of(&json!([{"a": 1}, 2])), ValueShape::ScalarList);
        assert_eq!(ValueShape::of(&json!([{"a": 1}, {"b": 2}])), ValueShape::MapList);
        assert_eq!(ValueShape::of(&json!({"a": [1]})), ValueShape::Map);
    }

    #[test]
    fn test_stored_form_keeps_tag() {
        let value = CachedValue::encode(&vec![json!({"id": 1}), json!({"id": 2})]).unwrap();
        let text = value.to_text().unwrap();

        let restored = CachedValue::from_stored(&text, value.shape().as_str()).unwrap();
        assert_eq!(restored, value);
        assert_eq!(restored.as_map_list().unwrap()[1]["id"], json!(2));
    }

    #[test]
    fn test_empty_list_accepted_as_map_list() {
        let restored = CachedValue::from_stored("[]", "map_list").unwrap();
        assert_eq!(restored.shape(), ValueShape::MapList);
        assert_eq!(restored.as_map_list().unwrap().len(), 0);
        let decoded: Vec<HashMap<String, i64>> = restored.decode().unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_mismatched_tag_rejected() {
        assert!(matches!(
            CachedValue::from_stored("{\"a\":1}", "scalar_list"),
            Err(CacheError::Decode(_))
        ));
        assert!(matches!(
            CachedValue::from_stored("1", "blob"),
            Err(CacheError::Decode(_))
        ));
        assert!(matches!(
            CachedValue::from_stored("not json", "scalar"),
            Err(CacheError::Serialization(_))
        ));
    }

    #[test]
    fn test_decode_nested_shapes() {
        let source: Vec<HashMap<String, Vec<u32>>> =
            vec![HashMap::from([("watched".to_string(), vec![1, 2])])];
        let value = CachedValue::encode(&source).unwrap();
        assert_eq!(value.shape(), ValueShape::MapList);

        let decoded: Vec<HashMap<String, Vec<u32>>> = value.decode().unwrap();
        assert_eq!(decoded, source);

        let wrong: Result<String, _> = value.decode();
        assert!(matches!(wrong, Err(CacheError::Decode(_))));
    }

    #[test]
    fn test_accessors_follow_shape() {
        let map = CachedValue::encode(&json!({"title": "x"})).unwrap();
        assert!(map.as_map().is_some());
        assert!(map.as_scalar().is_none());
        assert!(map.as_scalar_list().is_none());

        let scalars = CachedValue::encode(&["a", "b"]).unwrap();
        assert_eq!(scalars.as_scalar_list().unwrap().len(), 2);
        assert!(scalars.as_map_list().is_none());
    }
}
