use serde_json::Value;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::types::{Entry, dict_get, dict_set};

/// Parses JSON-encoded string fields in place.
#[derive(Debug, Clone, Default)]
pub struct JsonFields {
    fields: Vec<String>,
}

impl JsonFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn apply(&self, entry: &mut Entry) -> EtlResult<()> {
        for path in &self.fields {
            let Some(Value::String(encoded)) = dict_get(entry, path) else {
                continue;
            };

            let parsed: Value = serde_json::from_str(encoded).map_err(|err| {
                etl_error!(
                    ErrorKind::ConversionError,
                    "Field does not hold valid JSON",
                    path,
                    source: err
                )
            })?;
            dict_set(entry, path, parsed)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::row_from;

    #[test]
    fn parses_encoded_fields() {
        let mut entry = row_from(json!({
            "json": "{\"title\": \"a\", \"creators\": []}",
            "extra_data": {"already": "parsed"},
            "name": "{not json"
        }));

        JsonFields::new(["json", "extra_data"]).apply(&mut entry).unwrap();
        assert_eq!(entry["json"], json!({"title": "a", "creators": []}));
        assert_eq!(entry["extra_data"], json!({"already": "parsed"}));

        let err = JsonFields::new(["name"]).apply(&mut entry).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }
}
