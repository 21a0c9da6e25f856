use etl::tx::TransformAction;
use etl::types::{CdcOp, Tx};

use crate::actions::common::{EncryptedColumns, Replay};
use crate::source::{OAUTH_CLIENTS, OAUTH_TOKENS, REMOTE_ACCOUNTS, REMOTE_TOKENS, USER_IDENTITIES};

const SERVER_TOKENS: EncryptedColumns = &[(OAUTH_TOKENS, &["access_token", "refresh_token"])];
const REMOTE_TOKEN_SECRETS: EncryptedColumns = &[(REMOTE_TOKENS, &["access_token", "secret"])];

fn client(op: CdcOp, tx: &Tx) -> bool {
    tx.has(op, OAUTH_CLIENTS) && !tx.touches(OAUTH_TOKENS)
}

fn creates_token(tx: &Tx) -> bool {
    tx.has(CdcOp::Create, OAUTH_TOKENS)
}

fn updates_token(tx: &Tx) -> bool {
    tx.has(CdcOp::Update, OAUTH_TOKENS) && !creates_token(tx)
}

fn deletes_token(tx: &Tx) -> bool {
    tx.has(CdcOp::Delete, OAUTH_TOKENS) && !creates_token(tx) && !updates_token(tx)
}

fn connects(tx: &Tx) -> bool {
    tx.has(CdcOp::Create, REMOTE_ACCOUNTS)
}

fn updates_application(tx: &Tx) -> bool {
    tx.has(CdcOp::Update, REMOTE_TOKENS) && !tx.touches(REMOTE_ACCOUNTS)
}

fn disconnects(tx: &Tx) -> bool {
    tx.has(CdcOp::Delete, REMOTE_ACCOUNTS)
}

/// OAuth server clients and tokens, and the accounts linked to remote applications.
///
/// Tokens are re-encrypted under the new secret key when one is configured.
pub fn actions() -> Vec<Box<dyn TransformAction>> {
    vec![
        Box::new(Replay::new(
            "oauth-server-client-create",
            |tx| client(CdcOp::Create, tx),
            &[OAUTH_CLIENTS],
        )),
        Box::new(Replay::new(
            "oauth-server-client-update",
            |tx| client(CdcOp::Update, tx),
            &[OAUTH_CLIENTS],
        )),
        Box::new(Replay::new(
            "oauth-server-client-delete",
            |tx| client(CdcOp::Delete, tx),
            &[OAUTH_CLIENTS],
        )),
        Box::new(
            Replay::new(
                "oauth-server-token-create",
                creates_token,
                &[OAUTH_CLIENTS, OAUTH_TOKENS],
            )
            .with_encrypted(SERVER_TOKENS),
        ),
        Box::new(
            Replay::new(
                "oauth-server-token-update",
                updates_token,
                &[OAUTH_CLIENTS, OAUTH_TOKENS],
            )
            .with_encrypted(SERVER_TOKENS),
        ),
        // Tokens reference their client.
        Box::new(Replay::new(
            "oauth-server-token-delete",
            deletes_token,
            &[OAUTH_TOKENS, OAUTH_CLIENTS],
        )),
        Box::new(
            Replay::new(
                "oauth-application-connect",
                connects,
                &[REMOTE_ACCOUNTS, REMOTE_TOKENS, USER_IDENTITIES],
            )
            .with_encrypted(REMOTE_TOKEN_SECRETS),
        ),
        Box::new(
            Replay::new(
                "oauth-application-update",
                updates_application,
                &[REMOTE_TOKENS],
            )
            .with_encrypted(REMOTE_TOKEN_SECRETS),
        ),
        Box::new(Replay::new(
            "oauth-application-disconnect",
            disconnects,
            &[REMOTE_TOKENS, USER_IDENTITIES, REMOTE_ACCOUNTS],
        )),
    ]
}
