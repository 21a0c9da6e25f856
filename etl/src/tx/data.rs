use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{ErrorKind, EtlResult};
use crate::types::{Row, dict_get, dict_set};
use crate::{bail, etl_error};

/// Object view of the payload carried from a transform action to its load action.
///
/// Entities are stored under named top-level keys (`parent`, `record`, `files`, ...) and
/// addressed with dotted paths. Actions keep their payload typed and go through
/// [`LoadData::encode`] and [`LoadData::decode`] when keys are generated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadData(Map<String, Value>);

impl LoadData {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Serializes a typed payload, which must serialize to an object.
    pub fn encode<T: Serialize>(payload: &T) -> EtlResult<Self> {
        match serde_json::to_value(payload)? {
            Value::Object(map) => Ok(Self(map)),
            other => bail!(
                ErrorKind::InvalidData,
                "Action payload is not an object",
                other
            ),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> EtlResult<T> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        dict_get(&self.0, path)
    }

    /// Returns the value at `path`, failing with [`ErrorKind::MissingField`] when it is absent
    /// or null.
    pub fn required(&self, path: &str) -> EtlResult<&Value> {
        self.get(path)
            .filter(|value| !value.is_null())
            .ok_or_else(|| etl_error!(ErrorKind::MissingField, "Action data field is missing", path))
    }

    pub fn str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn required_str(&self, path: &str) -> EtlResult<&str> {
        self.required(path)?.as_str().ok_or_else(|| {
            etl_error!(ErrorKind::InvalidData, "Action data field is not a string", path)
        })
    }

    pub fn i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(Value::as_i64)
    }

    pub fn required_i64(&self, path: &str) -> EtlResult<i64> {
        self.required(path)?.as_i64().ok_or_else(|| {
            etl_error!(ErrorKind::InvalidData, "Action data field is not an integer", path)
        })
    }

    /// Returns a copy of the object at `path`.
    pub fn row(&self, path: &str) -> Option<Row> {
        self.get(path).and_then(Value::as_object).cloned()
    }

    pub fn required_row(&self, path: &str) -> EtlResult<Row> {
        self.required(path)?.as_object().cloned().ok_or_else(|| {
            etl_error!(ErrorKind::InvalidData, "Action data field is not an object", path)
        })
    }

    /// Returns copies of the objects in the array at `path`.
    pub fn rows(&self, path: &str) -> Vec<Row> {
        self.get(path)
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_object).cloned().collect())
            .unwrap_or_default()
    }

    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some_and(|value| !value.is_null())
    }

    pub fn set(&mut self, path: &str, value: Value) -> EtlResult<()> {
        dict_set(&mut self.0, path, value)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for LoadData {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
