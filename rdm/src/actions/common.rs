use async_trait::async_trait;
use etl::error::EtlResult;
use etl::operation::{Operation, OperationType};
use etl::transform::Reencryptor;
use etl::tx::{ActionContext, LoadAction, TransformAction};
use etl::typed_payload;
use etl::types::{CdcOp, Row, Tx, TxOperation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::source;

/// Columns stored encrypted, per source table.
pub type EncryptedColumns = &'static [(&'static str, &'static [&'static str])];

/// Classifies transactions with a predicate and replays their changes onto the mapped target
/// tables.
///
/// Changes are applied table by table following `order`, keeping transaction order within a
/// table. Changes on tables listed in `deletes` are applied as deletes whatever their kind.
/// Columns listed in `encrypted` are re-encrypted under the new secret when one is set.
pub struct Replay {
    name: &'static str,
    matches: fn(&Tx) -> bool,
    order: &'static [&'static str],
    deletes: &'static [&'static str],
    encrypted: EncryptedColumns,
}

impl Replay {
    pub const fn new(
        name: &'static str,
        matches: fn(&Tx) -> bool,
        order: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            matches,
            order,
            deletes: &[],
            encrypted: &[],
        }
    }

    pub const fn with_deletes(mut self, deletes: &'static [&'static str]) -> Self {
        self.deletes = deletes;
        self
    }

    pub const fn with_encrypted(mut self, encrypted: EncryptedColumns) -> Self {
        self.encrypted = encrypted;
        self
    }
}

impl TransformAction for Replay {
    fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, tx: &Tx) -> bool {
        (self.matches)(tx)
    }

    fn transform(&self, tx: &Tx) -> EtlResult<Box<dyn LoadAction>> {
        let tx = source::normalize(tx)?;
        let changes = changes_in_order(&tx, self.order)
            .into_iter()
            .map(|change| {
                let mut change = change.clone();
                if self.deletes.contains(&change.table()) {
                    change.op = CdcOp::Delete;
                }
                change
            })
            .collect();

        Ok(Box::new(ReplayLoad {
            name: self.name,
            data: TxData::of(&tx),
            changes,
            encrypted: self.encrypted,
        }))
    }
}

#[derive(Debug)]
struct ReplayLoad {
    name: &'static str,
    data: TxData,
    changes: Vec<TxOperation>,
    encrypted: EncryptedColumns,
}

#[async_trait]
impl LoadAction for ReplayLoad {
    fn name(&self) -> &'static str {
        self.name
    }

    typed_payload!(data);

    async fn resolve_references(&mut self, ctx: &mut ActionContext<'_>) -> EtlResult<()> {
        if self.encrypted.is_empty() {
            return Ok(());
        }
        let Some(reencryptor) = Reencryptor::from_state(ctx.state)? else {
            return Ok(());
        };

        for change in self.changes.iter_mut() {
            let Some((_, columns)) = self
                .encrypted
                .iter()
                .find(|(table, _)| *table == change.table())
            else {
                continue;
            };
            for image in [change.before.as_mut(), change.after.as_mut()]
                .into_iter()
                .flatten()
            {
                reencrypt(&reencryptor, image, columns)?;
            }
        }

        Ok(())
    }

    async fn generate_rows(&mut self, _ctx: &mut ActionContext<'_>) -> EtlResult<Vec<Operation>> {
        source::rows().generate_all(&self.changes)
    }
}

/// Re-encrypts the string values of `columns` in `row`.
pub fn reencrypt(reencryptor: &Reencryptor, row: &mut Row, columns: &[&str]) -> EtlResult<()> {
    for column in columns {
        if let Some(Value::String(ciphertext)) = row.get(*column) {
            if ciphertext.is_empty() {
                continue;
            }
            let reencrypted = reencryptor.reencrypt(ciphertext)?;
            debug!(column, "re-encrypted column");
            row.insert(column.to_string(), Value::String(reencrypted));
        }
    }
    Ok(())
}

/// Returns the changes on the tables of `order`, table by table.
pub fn changes_in_order<'a>(tx: &'a Tx, order: &[&'a str]) -> Vec<&'a TxOperation> {
    order.iter().flat_map(|table| tx.on(table)).collect()
}

/// Payload of the actions that carry nothing but their transaction id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxData {
    pub tx_id: i64,
}

impl TxData {
    pub fn of(tx: &Tx) -> Self {
        Self { tx_id: tx.id }
    }
}

/// Returns the image of the first `op` change on `table`.
pub fn first_row(tx: &Tx, op: CdcOp, table: &str) -> Option<Row> {
    tx.first(op, table).map(TxOperation::data)
}

/// Returns the images of the `op` changes on `table`.
pub fn rows_of(tx: &Tx, op: CdcOp, table: &str) -> Vec<Row> {
    tx.ops(op, table).map(TxOperation::data).collect()
}

/// Returns whether every change of `tx` is on one of `tables`.
pub fn only_touches(tx: &Tx, tables: &[&str]) -> bool {
    !tx.operations.is_empty()
        && tx
            .operations
            .iter()
            .all(|change| tables.contains(&change.table()))
}

/// Returns whether `operations` holds an `op` on the table named `table`.
pub fn contains(operations: &[Operation], op: OperationType, table: &str) -> bool {
    operations.iter().any(|operation| operation.is(op, table))
}

#[cfg(test)]
mod tests {
    use etl::state::StateStore;
    use etl::test_utils::{MemoryDatabase, tx};
    use etl::transform::{NEW_SECRET_KEY, OLD_SECRET_KEY, SymmetricKey};
    use etl::tx::prepare;
    use etl::types::row_from;
    use serde_json::json;
    use etl::state::StateTable;

    use super::*;
    use crate::source::{OAUTH_TOKENS, SESSIONS, USERS};

    fn user_tx() -> Tx {
        tx(
            1,
            vec![
                (CdcOp::Update, SESSIONS, json!({"sid_s": "s1", "user_id": 1})),
                (CdcOp::Update, USERS, json!({"id": 1, "updated": 1_577_836_800_000_000_i64})),
            ],
        )
    }

    #[tokio::test]
    async fn changes_follow_the_table_order() {
        let action = Replay::new("user-any", |tx| tx.touches(USERS), &[USERS, SESSIONS])
            .with_deletes(&[SESSIONS]);
        let mut load = action.transform(&user_tx()).unwrap();

        let mut state = StateStore::new();
        let mut db = MemoryDatabase::new();
        let mut ctx = ActionContext {
            state: &mut state,
            session: &mut db,
        };
        let operations = prepare(load.as_mut(), &mut ctx).await.unwrap();

        assert_eq!(
            operations.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["UPDATE accounts_user", "DELETE accounts_user_session_activity"]
        );
        assert_eq!(operations[0].data["updated"], "2020-01-01T00:00:00");
        assert_eq!(load.payload().unwrap().i64("tx_id"), Some(1));
    }

    #[tokio::test]
    async fn encrypted_columns_are_reencrypted() {
        let old = SymmetricKey::from_secret("old");
        let new = SymmetricKey::from_secret("new");
        let token = old.encrypt(b"token").unwrap();

        let mut state = StateStore::with_defaults(true);
        for (key, value) in [(OLD_SECRET_KEY, "old"), (NEW_SECRET_KEY, "new")] {
            state
                .add(StateTable::Global, row_from(json!({"key": key, "value": value})))
                .unwrap();
        }

        let action = Replay::new("token", |tx| tx.touches(OAUTH_TOKENS), &[OAUTH_TOKENS])
            .with_encrypted(&[(OAUTH_TOKENS, &["access_token", "refresh_token"])]);
        let change = tx(
            2,
            vec![(
                CdcOp::Create,
                OAUTH_TOKENS,
                json!({"id": 1, "client_id": "c", "access_token": token, "refresh_token": null}),
            )],
        );
        let mut load = action.transform(&change).unwrap();

        let mut db = MemoryDatabase::new();
        let mut ctx = ActionContext {
            state: &mut state,
            session: &mut db,
        };
        let operations = prepare(load.as_mut(), &mut ctx).await.unwrap();

        let reencrypted = operations[0].data["access_token"].as_str().unwrap();
        assert_eq!(new.decrypt(reencrypted).unwrap(), b"token");
        assert_eq!(operations[0].data["refresh_token"], Value::Null);
    }

    #[test]
    fn table_predicates() {
        assert!(only_touches(&user_tx(), &[USERS, SESSIONS]));
        assert!(!only_touches(&user_tx(), &[USERS]));
        assert!(!only_touches(&Tx::new(1, vec![]), &[USERS]));
    }
}
