use etl::tx::TransformAction;
use etl::types::{CdcOp, Tx};
use serde_json::Value;

use crate::actions::common::{Replay, only_touches};
use crate::source::{SESSIONS, USER_IDENTITIES, USER_LOGIN_INFORMATION, USERS};

/// Returns whether `tx` switches a user to inactive.
fn deactivates(tx: &Tx) -> bool {
    tx.ops(CdcOp::Update, USERS).any(|change| {
        change
            .after
            .as_ref()
            .and_then(|after| after.get("active"))
            == Some(&Value::Bool(false))
    })
}

fn registers(tx: &Tx) -> bool {
    tx.has(CdcOp::Create, USERS)
}

fn edits(tx: &Tx) -> bool {
    let profile_change = tx.has(CdcOp::Update, USERS) && !deactivates(tx) && !registers(tx);
    profile_change || only_touches(tx, &[USER_LOGIN_INFORMATION])
}

fn deactivation(tx: &Tx) -> bool {
    deactivates(tx) && !registers(tx)
}

pub fn actions() -> Vec<Box<dyn TransformAction>> {
    vec![
        Box::new(Replay::new(
            "user-register",
            registers,
            &[USERS, USER_LOGIN_INFORMATION, USER_IDENTITIES],
        )),
        Box::new(Replay::new(
            "user-edit",
            edits,
            &[USERS, USER_LOGIN_INFORMATION, SESSIONS, USER_IDENTITIES],
        )),
        // Sessions of a deactivated user are revoked.
        Box::new(
            Replay::new(
                "user-deactivate",
                deactivation,
                &[USERS, USER_LOGIN_INFORMATION, SESSIONS],
            )
            .with_deletes(&[SESSIONS]),
        ),
    ]
}
