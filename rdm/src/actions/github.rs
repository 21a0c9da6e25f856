use async_trait::async_trait;
use etl::error::{ErrorKind, EtlResult};
use etl::operation::Operation;
use etl::tx::{ActionContext, LoadAction, TransformAction};
use etl::types::{CdcOp, Row, Tx, TxOperation};
use etl::{etl_error, typed_payload};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::actions::common::{Replay, changes_in_order, first_row};
use crate::actions::records::{created_version, versions_state};
use crate::models::GITHUB_RELEASES as RELEASES_MODEL;
use crate::publish::{self, RecordVersion};
use crate::rows;
use crate::source::{self, GITHUB_RELEASES, GITHUB_REPOSITORIES, RECORDS, WEBHOOK_EVENTS};

fn writes(tx: &Tx, table: &str) -> bool {
    tx.has(CdcOp::Create, table) || tx.has(CdcOp::Update, table)
}

fn hook_event(tx: &Tx) -> bool {
    writes(tx, WEBHOOK_EVENTS) && !tx.touches(GITHUB_RELEASES) && !tx.touches(GITHUB_REPOSITORIES)
}

fn repository(tx: &Tx) -> bool {
    writes(tx, GITHUB_REPOSITORIES) && !tx.touches(GITHUB_RELEASES)
}

fn release_update(tx: &Tx) -> bool {
    tx.has(CdcOp::Update, GITHUB_RELEASES) && !tx.has(CdcOp::Create, GITHUB_RELEASES)
}

pub fn actions() -> Vec<Box<dyn TransformAction>> {
    vec![
        Box::new(Replay::new("github-hook-event", hook_event, &[WEBHOOK_EVENTS])),
        Box::new(Replay::new(
            "github-repo",
            repository,
            &[GITHUB_REPOSITORIES, WEBHOOK_EVENTS],
        )),
        Box::new(GithubRelease),
        Box::new(Replay::new(
            "github-release-update",
            release_update,
            &[GITHUB_RELEASES],
        )),
    ]
}

/// A GitHub release, published as a new record version when the transaction carries one.
pub struct GithubRelease;

impl TransformAction for GithubRelease {
    fn name(&self) -> &'static str {
        "github-release"
    }

    fn matches(&self, tx: &Tx) -> bool {
        tx.has(CdcOp::Create, GITHUB_RELEASES)
    }

    fn transform(&self, tx: &Tx) -> EtlResult<Box<dyn LoadAction>> {
        let tx = source::normalize(tx)?;
        let version = if tx.has(CdcOp::Create, RECORDS) {
            Some(created_version(&tx)?)
        } else {
            None
        };
        let release = first_row(&tx, CdcOp::Create, GITHUB_RELEASES).ok_or_else(|| {
            etl_error!(ErrorKind::MissingField, "Transaction has no release", tx.id)
        })?;

        let changes = changes_in_order(&tx, &[GITHUB_REPOSITORIES, WEBHOOK_EVENTS])
            .into_iter()
            .filter(|change| change.op != CdcOp::Delete)
            .cloned()
            .collect();

        Ok(Box::new(GithubReleaseLoad {
            data: GithubReleaseData {
                tx_id: tx.id,
                version,
                release,
            },
            changes,
        }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GithubReleaseData {
    tx_id: i64,
    /// Record version published by the release, if any.
    version: Option<RecordVersion>,
    release: Row,
}

#[derive(Debug)]
struct GithubReleaseLoad {
    data: GithubReleaseData,
    changes: Vec<TxOperation>,
}

#[async_trait]
impl LoadAction for GithubReleaseLoad {
    fn name(&self) -> &'static str {
        "github-release"
    }

    typed_payload!(data);

    async fn generate_rows(&mut self, ctx: &mut ActionContext<'_>) -> EtlResult<Vec<Operation>> {
        let mut operations = Vec::new();
        let mut release = rows::project(&RELEASES_MODEL, &self.data.release);

        if let Some(version) = &self.data.version {
            let publication = publish::publish(ctx.state, version.clone())?;
            let versions = versions_state(ctx.state, &publication)?;
            info!(record_id = %publication.record_id, "published release");
            if release.get("record_id").is_none_or(|record_id| record_id.is_null()) {
                release.insert("record_id".to_string(), json!(publication.record_id));
            }
            operations.extend(publication.operations);
            operations.push(versions);
        }

        operations.extend(source::rows().generate_all(&self.changes)?);
        operations.push(Operation::insert(&RELEASES_MODEL, release));
        Ok(operations)
    }
}
