use serde_json::Value;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::transform::Transform;
use crate::types::{Entry, dict_get};

/// Returns the value at `path`, failing with [`ErrorKind::MissingField`] when it is absent.
pub fn field<'a>(entry: &'a Entry, path: &str) -> EtlResult<&'a Value> {
    dict_get(entry, path)
        .ok_or_else(|| etl_error!(ErrorKind::MissingField, "Source field is missing", path))
}

/// Returns the value at `path`, or null when it is absent.
pub fn optional_field(entry: &Entry, path: &str) -> Value {
    dict_get(entry, path).cloned().unwrap_or(Value::Null)
}

type FieldFn = Box<dyn Fn(&Entry) -> EtlResult<Value> + Send + Sync>;

/// Builds a target entry field by field.
///
/// Each target field is computed from the source entry, by default by copying the source
/// field of the same name. In partial mode a target field whose source is missing is left
/// out; every other error is returned.
pub struct EntryMapper {
    partial: bool,
    fields: Vec<(String, FieldFn)>,
}

impl EntryMapper {
    pub fn new() -> Self {
        Self {
            partial: false,
            fields: Vec::new(),
        }
    }

    pub fn partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    /// Copies the source field `name`.
    pub fn copy(self, name: &str) -> Self {
        let source = name.to_string();
        self.map(name, move |entry| field(entry, &source).cloned())
    }

    /// Copies every listed source field.
    pub fn copy_all(self, names: &[&str]) -> Self {
        names.iter().fold(self, |mapper, name| mapper.copy(name))
    }

    /// Copies the source field at `source` into `target`.
    pub fn rename(self, target: &str, source: &str) -> Self {
        let source = source.to_string();
        self.map(target, move |entry| field(entry, &source).cloned())
    }

    /// Computes `target` with `compute`.
    pub fn map<F>(mut self, target: &str, compute: F) -> Self
    where
        F: Fn(&Entry) -> EtlResult<Value> + Send + Sync + 'static,
    {
        self.fields.push((target.to_string(), Box::new(compute)));
        self
    }

    pub fn apply(&self, entry: &Entry) -> EtlResult<Entry> {
        let mut target = Entry::new();
        for (name, compute) in &self.fields {
            match compute(entry) {
                Ok(value) => {
                    target.insert(name.clone(), value);
                }
                Err(err) if self.partial && err.kind() == ErrorKind::MissingField => continue,
                Err(err) => return Err(err),
            }
        }

        Ok(target)
    }
}

impl Default for EntryMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for EntryMapper {
    fn transform(&self, entry: &Entry) -> EtlResult<Entry> {
        self.apply(entry)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::bail;
    use crate::types::row_from;

    fn mapper() -> EntryMapper {
        EntryMapper::new()
            .copy("id")
            .rename("recid", "json.id")
            .map("title", |entry| {
                Ok(field(entry, "json.metadata.title")?.clone())
            })
    }

    #[test]
    fn maps_fields() {
        let entry = row_from(json!({"id": "r1", "json": {"id": "123", "metadata": {"title": "t"}}}));
        assert_eq!(
            mapper().apply(&entry).unwrap(),
            row_from(json!({"id": "r1", "recid": "123", "title": "t"}))
        );
    }

    #[test]
    fn missing_fields_fail_unless_partial() {
        let entry = row_from(json!({"id": "r1", "json": {"id": "123"}}));

        let err = mapper().apply(&entry).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);
        assert_eq!(err.detail(), Some("json.metadata.title"));

        let partial = mapper().partial(true).apply(&entry).unwrap();
        assert_eq!(partial, row_from(json!({"id": "r1", "recid": "123"})));
    }

    #[test]
    fn partial_mode_does_not_mask_other_errors() {
        let mapper = EntryMapper::new()
            .partial(true)
            .map("broken", |_| bail!(ErrorKind::InvalidData, "broken field"));

        let err = mapper.apply(&Entry::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
