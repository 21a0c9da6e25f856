use etl::error::EtlResult;
use etl::transform::{EntryMapper, Transform};
use etl::types::{Entry, Row, row_from};
use serde_json::{Value, json};

use crate::source::normalize_row;

const USER_COLUMNS: [&str; 14] = [
    "id",
    "created",
    "updated",
    "username",
    "displayname",
    "email",
    "password",
    "active",
    "confirmed_at",
    "version_id",
    "profile",
    "preferences",
    "blocked_at",
    "verified_at",
];

/// Turns a user dump line into a `{user, login_information, identities}` entry.
pub struct UserEntry {
    mapper: EntryMapper,
}

impl UserEntry {
    pub fn new() -> Self {
        Self {
            mapper: EntryMapper::new().partial(true).copy_all(&USER_COLUMNS),
        }
    }
}

impl Default for UserEntry {
    fn default() -> Self {
        Self::new()
    }
}

fn normalized(value: &Value) -> EtlResult<Option<Row>> {
    let Some(row) = value.as_object() else {
        return Ok(None);
    };
    let mut row = row.clone();
    normalize_row(&mut row)?;
    Ok(Some(row))
}

impl Transform for UserEntry {
    fn transform(&self, entry: &Entry) -> EtlResult<Entry> {
        let mut user = self.mapper.apply(entry)?;
        normalize_row(&mut user)?;

        let login = match entry.get("login_information") {
            Some(value) => normalized(value)?,
            None => None,
        };
        let mut identities = Vec::new();
        for identity in entry.get("identities").and_then(Value::as_array).into_iter().flatten() {
            if let Some(identity) = normalized(identity)? {
                identities.push(identity);
            }
        }

        Ok(row_from(json!({
            "user": user,
            "login_information": login,
            "identities": identities,
        })))
    }
}
