use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::schema::{ColumnSchema, ColumnType};

/// Format used for every rendered timestamp.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Errors raised when a JSON value cannot be rendered for a column.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueConversionError {
    #[error("column `{column}` expects {expected}, found `{found}`")]
    Mismatch {
        column: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("column `{column}` expects an ISO-8601 timestamp, found the integer `{found}`")]
    IntegerDateTime { column: &'static str, found: String },

    #[error("column `{column}` holds an invalid timestamp `{found}`")]
    InvalidDateTime { column: &'static str, found: String },

    #[error("column `{column}` holds an invalid uuid `{found}`")]
    InvalidUuid { column: &'static str, found: String },

    #[error("column `{column}` holds invalid json: {reason}")]
    InvalidJson { column: &'static str, reason: String },
}

/// Renders `value` as the text Postgres accepts for `column`.
///
/// `None` stands for SQL NULL. Objects are rendered as compact JSON, timestamps in ISO-8601
/// and UUIDs in their canonical hyphenated form. The same rendering feeds `COPY` CSV fields
/// and statement parameters.
pub fn render_value(
    value: &Value,
    column: &ColumnSchema,
) -> Result<Option<String>, ValueConversionError> {
    if value.is_null() {
        return Ok(None);
    }

    let rendered = match column.typ {
        ColumnType::Integer | ColumnType::BigInteger => render_integer(value, column)?,
        ColumnType::String => match value {
            Value::String(value) => value.clone(),
            Value::Number(value) => value.to_string(),
            Value::Bool(value) => value.to_string(),
            other => other.to_string(),
        },
        ColumnType::DateTime => render_datetime(value, column)?,
        ColumnType::Uuid => match value {
            Value::String(value) => Uuid::parse_str(value)
                .map_err(|_| ValueConversionError::InvalidUuid {
                    column: column.name,
                    found: value.clone(),
                })?
                .hyphenated()
                .to_string(),
            other => return Err(mismatch(column, "a uuid string", other)),
        },
        ColumnType::Boolean => match value {
            Value::Bool(value) => value.to_string(),
            Value::String(value) if value == "true" || value == "false" => value.clone(),
            other => return Err(mismatch(column, "a boolean", other)),
        },
        ColumnType::Json => value.to_string(),
    };

    Ok(Some(rendered))
}

/// Parses the text rendering of a column back into a JSON value.
///
/// An empty field maps to NULL for nullable columns and to an empty string for
/// non-nullable text columns.
pub fn parse_value(text: &str, column: &ColumnSchema) -> Result<Value, ValueConversionError> {
    if text.is_empty() {
        return match (column.nullable, column.typ) {
            (false, ColumnType::String) => Ok(Value::String(String::new())),
            _ => Ok(Value::Null),
        };
    }

    match column.typ {
        ColumnType::Integer | ColumnType::BigInteger => text
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| ValueConversionError::Mismatch {
                column: column.name,
                expected: "an integer",
                found: text.to_string(),
            }),
        ColumnType::String => Ok(Value::String(text.to_string())),
        ColumnType::DateTime => {
            render_datetime(&Value::String(text.to_string()), column).map(Value::String)
        }
        ColumnType::Uuid => Uuid::parse_str(text)
            .map(|uuid| Value::String(uuid.hyphenated().to_string()))
            .map_err(|_| ValueConversionError::InvalidUuid {
                column: column.name,
                found: text.to_string(),
            }),
        ColumnType::Boolean => match text {
            "true" | "t" => Ok(Value::Bool(true)),
            "false" | "f" => Ok(Value::Bool(false)),
            other => Err(ValueConversionError::Mismatch {
                column: column.name,
                expected: "a boolean",
                found: other.to_string(),
            }),
        },
        ColumnType::Json => {
            serde_json::from_str(text).map_err(|err| ValueConversionError::InvalidJson {
                column: column.name,
                reason: err.to_string(),
            })
        }
    }
}

/// Normalizes an ISO-8601 timestamp, with or without offset, to UTC.
pub fn normalize_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Some(datetime.naive_utc());
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f%#z"]
        .iter()
        .find_map(|format| {
            NaiveDateTime::parse_from_str(value, format)
                .ok()
                .or_else(|| DateTime::parse_from_str(value, format).ok().map(|dt| dt.naive_utc()))
        })
}

fn render_integer(value: &Value, column: &ColumnSchema) -> Result<String, ValueConversionError> {
    match value {
        Value::Number(number) if number.is_i64() || number.is_u64() => Ok(number.to_string()),
        Value::String(text) if text.parse::<i64>().is_ok() => Ok(text.clone()),
        other => Err(mismatch(column, "an integer", other)),
    }
}

fn render_datetime(value: &Value, column: &ColumnSchema) -> Result<String, ValueConversionError> {
    match value {
        Value::String(text) => normalize_datetime(text)
            .map(|datetime| datetime.format(DATETIME_FORMAT).to_string())
            .ok_or_else(|| ValueConversionError::InvalidDateTime {
                column: column.name,
                found: text.clone(),
            }),
        Value::Number(number) => Err(ValueConversionError::IntegerDateTime {
            column: column.name,
            found: number.to_string(),
        }),
        other => Err(mismatch(column, "an ISO-8601 timestamp", other)),
    }
}

fn mismatch(column: &ColumnSchema, expected: &'static str, found: &Value) -> ValueConversionError {
    ValueConversionError::Mismatch {
        column: column.name,
        expected,
        found: found.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ID: ColumnSchema = ColumnSchema::new("id", ColumnType::Integer);
    const NAME: ColumnSchema = ColumnSchema::new("name", ColumnType::String);
    const DESCRIPTION: ColumnSchema = ColumnSchema::new("description", ColumnType::String).nullable();
    const CREATED: ColumnSchema = ColumnSchema::new("created", ColumnType::DateTime);
    const OBJECT: ColumnSchema = ColumnSchema::new("object_uuid", ColumnType::Uuid).nullable();
    const HEAD: ColumnSchema = ColumnSchema::new("is_head", ColumnType::Boolean);
    const DOCUMENT: ColumnSchema = ColumnSchema::new("json", ColumnType::Json).nullable();

    #[test]
    fn null_renders_as_none() {
        assert_eq!(render_value(&Value::Null, &ID), Ok(None));
        assert_eq!(render_value(&Value::Null, &DOCUMENT), Ok(None));
    }

    #[test]
    fn scalars_render_as_text() {
        assert_eq!(render_value(&json!(1000042), &ID).unwrap().unwrap(), "1000042");
        assert_eq!(render_value(&json!("17"), &ID).unwrap().unwrap(), "17");
        assert_eq!(render_value(&json!(true), &HEAD).unwrap().unwrap(), "true");
        assert_eq!(render_value(&json!(12), &NAME).unwrap().unwrap(), "12");
        assert!(render_value(&json!("abc"), &ID).is_err());
        assert!(render_value(&json!(1.5), &ID).is_err());
    }

    #[test]
    fn datetimes_are_iso_and_integers_are_rejected() {
        assert_eq!(
            render_value(&json!("2024-01-02T03:04:05.123456+00:00"), &CREATED)
                .unwrap()
                .unwrap(),
            "2024-01-02T03:04:05.123456"
        );
        assert_eq!(
            render_value(&json!("2024-01-02T05:04:05+02:00"), &CREATED)
                .unwrap()
                .unwrap(),
            "2024-01-02T03:04:05"
        );
        assert!(matches!(
            render_value(&json!(1704164645000000_i64), &CREATED),
            Err(ValueConversionError::IntegerDateTime { .. })
        ));
        assert!(matches!(
            render_value(&json!("yesterday"), &CREATED),
            Err(ValueConversionError::InvalidDateTime { .. })
        ));
    }

    #[test]
    fn uuids_are_canonicalized() {
        assert_eq!(
            render_value(&json!("2D69A8F2C7B24E4C9A4E3F1B2C3D4386"), &OBJECT)
                .unwrap()
                .unwrap(),
            "2d69a8f2-c7b2-4e4c-9a4e-3f1b2c3d4386"
        );
        assert!(render_value(&json!("not-a-uuid"), &OBJECT).is_err());
    }

    #[test]
    fn objects_render_as_json() {
        let value = json!({"title": "Ünïcode", "creators": [1, 2]});
        let rendered = render_value(&value, &DOCUMENT).unwrap().unwrap();
        assert!(rendered.contains("Ünïcode"));
        assert_eq!(parse_value(&rendered, &DOCUMENT).unwrap(), value);
    }

    #[test]
    fn empty_fields_respect_nullability() {
        assert_eq!(parse_value("", &DESCRIPTION).unwrap(), Value::Null);
        assert_eq!(parse_value("", &NAME).unwrap(), json!(""));
        assert_eq!(parse_value("", &ID).unwrap(), Value::Null);
    }

    #[test]
    fn parse_recovers_rendered_values() {
        for (value, column) in [
            (json!(5), &ID),
            (json!("2024-01-02T03:04:05.500"), &CREATED),
            (json!("2d69a8f2-c7b2-4e4c-9a4e-3f1b2c3d4386"), &OBJECT),
            (json!(false), &HEAD),
        ] {
            let rendered = render_value(&value, column).unwrap().unwrap();
            assert_eq!(parse_value(&rendered, column).unwrap(), value);
        }
    }
}
