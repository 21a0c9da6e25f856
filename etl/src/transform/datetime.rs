use chrono::DateTime;
use postgres::types::DATETIME_FORMAT;
use serde_json::Value;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::types::{Entry, dict_get, dict_set};

/// Resolution of integer timestamps in source data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampUnit {
    #[default]
    Micros,
    Millis,
}

/// Renders an integer UTC timestamp as an ISO-8601 string.
pub fn timestamp_to_iso(value: i64, unit: TimestampUnit) -> EtlResult<String> {
    let datetime = match unit {
        TimestampUnit::Micros => DateTime::from_timestamp_micros(value),
        TimestampUnit::Millis => DateTime::from_timestamp_millis(value),
    }
    .ok_or_else(|| {
        etl_error!(
            ErrorKind::ConversionError,
            "Timestamp out of range",
            value
        )
    })?;

    Ok(datetime.naive_utc().format(DATETIME_FORMAT).to_string())
}

/// Converts integer timestamps found at the given paths to ISO-8601 strings.
///
/// Strings and nulls are left untouched so that already converted entries pass through.
#[derive(Debug, Clone, Default)]
pub struct DateTimeFields {
    fields: Vec<String>,
    unit: TimestampUnit,
}

impl DateTimeFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            unit: TimestampUnit::Micros,
        }
    }

    pub fn with_unit(mut self, unit: TimestampUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn apply(&self, entry: &mut Entry) -> EtlResult<()> {
        for path in &self.fields {
            let converted = match dict_get(entry, path) {
                None | Some(Value::Null) | Some(Value::String(_)) => continue,
                Some(Value::Number(number)) => match number.as_i64() {
                    Some(value) => timestamp_to_iso(value, self.unit)?,
                    None => bail!(
                        ErrorKind::ConversionError,
                        "Timestamp is not an integer",
                        format!("{path} = {number}")
                    ),
                },
                Some(other) => bail!(
                    ErrorKind::ConversionError,
                    "Timestamp has an unexpected type",
                    format!("{path} = {other}")
                ),
            };
            dict_set(entry, path, Value::String(converted))?;
        }

        Ok(())
    }
}
