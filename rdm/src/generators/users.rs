use etl::error::EtlResult;
use etl::load::bulk::{TableGenerator, TableRow};
use etl::state::StateStore;
use etl::types::Entry;
use postgres::schema::TableModel;
use serde_json::Value;
use tracing::debug;

use crate::generators::{object, objects, required_object};
use crate::models::{ACCOUNTS_USER, ACCOUNTS_USER_LOGIN_INFORMATION, ACCOUNTS_USERIDENTITY};
use crate::rows;

/// User accounts with their login information and linked identities.
#[derive(Debug, Default)]
pub struct UsersGenerator;

impl UsersGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl TableGenerator for UsersGenerator {
    fn name(&self) -> &'static str {
        "users"
    }

    fn tables(&self) -> Vec<&'static TableModel> {
        vec![
            &ACCOUNTS_USER,
            &ACCOUNTS_USER_LOGIN_INFORMATION,
            &ACCOUNTS_USERIDENTITY,
        ]
    }

    fn generate(&mut self, entry: &Entry, _state: &mut StateStore) -> EtlResult<Vec<TableRow>> {
        let user = required_object(entry, "user")?;
        let user_id = rows::key(&user, "id")?;
        let id = user.get("id").cloned().unwrap_or(Value::Null);
        let mut generated = vec![TableRow::new(&ACCOUNTS_USER, rows::project(&ACCOUNTS_USER, &user))];

        if let Some(mut login) = object(entry, "login_information") {
            login
                .entry("user_id")
                .or_insert_with(|| id.clone());
            generated.push(TableRow::new(
                &ACCOUNTS_USER_LOGIN_INFORMATION,
                rows::project(&ACCOUNTS_USER_LOGIN_INFORMATION, &login),
            ));
        }

        for mut identity in objects(entry, "identities") {
            if identity.get("id_user").is_none_or(Value::is_null) {
                identity.insert("id_user".to_string(), id.clone());
            }
            generated.push(TableRow::new(
                &ACCOUNTS_USERIDENTITY,
                rows::project(&ACCOUNTS_USERIDENTITY, &identity),
            ));
        }

        debug!(user_id = %user_id, rows = generated.len(), "generated user");
        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use etl::types::row_from;
    use serde_json::json;

    use super::*;

    #[test]
    fn users_carry_their_login_and_identities() {
        let entry = row_from(json!({
            "user": {
                "id": 7,
                "email": "ada@example.org",
                "active": true,
                "created": "2020-01-01T00:00:00",
                "updated": "2020-01-01T00:00:00",
                "legacy_column": "dropped",
            },
            "login_information": {"login_count": 4},
            "identities": [{"id": "0000-0002-1825-0097", "method": "orcid", "created": "2020-01-01T00:00:00"}],
        }));

        let rows = UsersGenerator::new().generate(&entry, &mut StateStore::new()).unwrap();

        assert_eq!(rows.len(), 3);
        assert!(!rows[0].data.contains_key("legacy_column"));
        assert_eq!(rows[1].data["user_id"], 7);
        assert_eq!(rows[2].data["id_user"], 7);
        assert_eq!(rows[2].model.name, "accounts_useridentity");
    }
}
