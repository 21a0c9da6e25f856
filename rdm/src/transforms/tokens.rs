use etl::error::EtlResult;
use etl::transform::{Reencryptor, Transform};
use etl::types::Entry;

use crate::actions::common::reencrypt;
use crate::source::normalize_row;

const ENCRYPTED_COLUMNS: [&str; 2] = ["access_token", "secret"];

/// Normalizes remote token rows and moves their secrets under the new key.
///
/// Without a re-encryptor tokens are copied as they are.
pub struct RemoteTokenEntry {
    reencryptor: Option<Reencryptor>,
}

impl RemoteTokenEntry {
    pub fn new(reencryptor: Option<Reencryptor>) -> Self {
        Self { reencryptor }
    }
}

impl Transform for RemoteTokenEntry {
    fn transform(&self, entry: &Entry) -> EtlResult<Entry> {
        let mut token = entry.clone();
        normalize_row(&mut token)?;
        if let Some(reencryptor) = &self.reencryptor {
            reencrypt(reencryptor, &mut token, &ENCRYPTED_COLUMNS)?;
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use etl::transform::SymmetricKey;
    use etl::types::row_from;
    use serde_json::json;

    use super::*;

    #[test]
    fn tokens_are_reencrypted() {
        let old = SymmetricKey::from_secret("old");
        let new = SymmetricKey::from_secret("new");
        let line = row_from(json!({
            "id_remote_account": 1,
            "token_type": "",
            "access_token": old.encrypt(b"gho_token").unwrap(),
            "secret": "",
            "created": 1_577_836_800_000_000_i64,
        }));

        let token = RemoteTokenEntry::new(Some(Reencryptor::new("old", "new")))
            .transform(&line)
            .unwrap();

        let access_token = token["access_token"].as_str().unwrap();
        assert_eq!(new.decrypt(access_token).unwrap(), b"gho_token");
        assert_eq!(token["secret"], "");
        assert_eq!(token["created"], "2020-01-01T00:00:00");
    }

    #[test]
    fn tokens_are_copied_without_secrets() {
        let line = row_from(json!({"id_remote_account": 1, "access_token": "opaque"}));

        let token = RemoteTokenEntry::new(None).transform(&line).unwrap();

        assert_eq!(token["access_token"], "opaque");
    }
}
