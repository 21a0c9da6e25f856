//! Registry of the migration streams, in the order they run.
//!
//! Backfill streams read JSON-lines dumps and COPY generated tables; the `changes` stream
//! replays the change feed on top of them. The `state` stream runs first and seeds the global
//! state every other stream allocates from.

use std::path::PathBuf;

use config::shared::{MigratorConfig, StreamConfig};
use etl::error::{ErrorKind, EtlResult};
use etl::extract::{JsonLinesExtract, NullExtract, TxFileExtract};
use etl::ids::{MAX_PID_PK_KEY, PID_PK_MIN};
use etl::load::bulk::{PgBulkLoad, TableGenerator};
use etl::load::{PgSqlLoad, StateLoad};
use etl::state::{GlobalState, StateStore, StateTable};
use etl::stream::{EtlStream, RunnableStream, StreamContext, StreamDefinition};
use etl::transform::{
    Identity, NEW_SECRET_KEY, OLD_SECRET_KEY, Reencryptor, Transform, TransformStage,
};
use etl::tx::TxTransform;
use etl::types::Entry;
use etl::{bail, etl_error};
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::{info, warn};

use crate::actions;
use crate::generators::{
    CommunitiesGenerator, DraftsGenerator, RecordsGenerator, SingleTableGenerator, UsersGenerator,
};
use crate::models::{FILES_FILES, OAUTHCLIENT_REMOTETOKEN};
use crate::source::normalize_row;
use crate::transforms::{CommunityEntry, RemoteTokenEntry, UserEntry, VersionEntry};

pub const STATE: &str = "state";
pub const COMMUNITIES: &str = "communities";
pub const USERS: &str = "users";
pub const FILES: &str = "files";
pub const RECORDS: &str = "records";
pub const DRAFTS: &str = "drafts";
pub const TOKENS: &str = "tokens";
pub const CHANGES: &str = "changes";

/// Returns every stream definition in run order.
pub fn all() -> Vec<StreamDefinition> {
    vec![
        StreamDefinition::new(STATE, state_stream),
        StreamDefinition::new(COMMUNITIES, |config, ctx| {
            bulk_stream(
                COMMUNITIES,
                config,
                ctx,
                CommunityEntry::new(),
                vec![Box::new(CommunitiesGenerator::new())],
            )
        }),
        StreamDefinition::new(USERS, |config, ctx| {
            bulk_stream(USERS, config, ctx, UserEntry::new(), vec![Box::new(UsersGenerator::new())])
        }),
        StreamDefinition::new(FILES, |config, ctx| {
            let generator = SingleTableGenerator::new(FILES, &FILES_FILES)
                .with_existing_data(config.load.existing_data);
            bulk_stream(FILES, config, ctx, normalized, vec![Box::new(generator)])
        }),
        StreamDefinition::new(RECORDS, |config, ctx| {
            bulk_stream(
                RECORDS,
                config,
                ctx,
                VersionEntry::records(),
                vec![Box::new(RecordsGenerator::new())],
            )
        }),
        StreamDefinition::new(DRAFTS, |config, ctx| {
            bulk_stream(
                DRAFTS,
                config,
                ctx,
                VersionEntry::drafts(),
                vec![Box::new(DraftsGenerator::new())],
            )
        }),
        StreamDefinition::new(TOKENS, |config, ctx| {
            let reencryptor = Reencryptor::from_state(ctx.state)?;
            if reencryptor.is_none() {
                warn!(stream = TOKENS, "no secret keys in state, tokens are copied as they are");
            }
            let generator = SingleTableGenerator::new(TOKENS, &OAUTHCLIENT_REMOTETOKEN);
            bulk_stream(
                TOKENS,
                config,
                ctx,
                RemoteTokenEntry::new(reencryptor),
                vec![Box::new(generator)],
            )
        }),
        StreamDefinition::new(CHANGES, changes_stream),
    ]
}

/// Returns the dump file of stream `name`.
fn filepath(name: &str, config: &StreamConfig) -> EtlResult<PathBuf> {
    config.extract.filepath.clone().ok_or_else(|| {
        etl_error!(
            ErrorKind::ConfigError,
            "Stream has no extract file",
            format!("set `streams.{name}.extract.filepath`")
        )
    })
}

fn normalized(entry: &Entry) -> EtlResult<Entry> {
    let mut row = entry.clone();
    normalize_row(&mut row)?;
    Ok(row)
}

fn bulk_stream<T: Transform>(
    name: &'static str,
    config: &StreamConfig,
    ctx: &StreamContext<'_>,
    transform: T,
    generators: Vec<Box<dyn TableGenerator>>,
) -> EtlResult<Box<dyn RunnableStream>> {
    let extract = JsonLinesExtract::<Entry>::new(filepath(name, config)?);
    let transform = TransformStage::from_config(transform, &config.transform);
    let load = PgBulkLoad::new(ctx.config.db.clone(), config.load.clone(), generators);

    Ok(EtlStream::new(name, extract, transform, load).boxed())
}

fn state_stream(
    _config: &StreamConfig,
    ctx: &StreamContext<'_>,
) -> EtlResult<Box<dyn RunnableStream>> {
    let secrets = ctx.config.secret_keys.as_ref().map(|keys| {
        (
            keys.old.expose_secret().to_string(),
            keys.new.expose_secret().to_string(),
        )
    });

    let load = StateLoad::new(move |_entry: Entry, state: &mut StateStore| {
        initialize(state, secrets.as_ref())
    });
    let transform = TransformStage::new(Identity);

    Ok(EtlStream::new(STATE, NullExtract, transform, load).boxed())
}

/// Writes the key material and the PID high-water mark into the `global` table.
///
/// An existing high-water mark is kept, so allocation resumes where the previous run stopped.
fn initialize(state: &mut StateStore, secrets: Option<&(String, String)>) -> EtlResult<()> {
    if let Some((old, new)) = secrets {
        for (key, value) in [(OLD_SECRET_KEY, old), (NEW_SECRET_KEY, new)] {
            state.put_as(&GlobalState {
                key: key.to_string(),
                value: json!(value),
            })?;
        }
        info!("stored re-encryption secrets");
    }

    if !state.contains(StateTable::Global, MAX_PID_PK_KEY) {
        state.add_as(&GlobalState {
            key: MAX_PID_PK_KEY.to_string(),
            value: json!(PID_PK_MIN - 1),
        })?;
    }

    Ok(())
}

fn changes_stream(
    config: &StreamConfig,
    ctx: &StreamContext<'_>,
) -> EtlResult<Box<dyn RunnableStream>> {
    if config.transform.workers > 0 {
        bail!(
            ErrorKind::ConfigError,
            "Transactions must be replayed in order",
            format!("`streams.{CHANGES}.transform.workers` must be 0")
        );
    }

    let extract = TxFileExtract::new(filepath(CHANGES, config)?);
    let transform = TxTransform::new(actions::all()).with_throw(config.transform.throw);
    let load = PgSqlLoad::new(ctx.config.db.clone(), config.load.clone());

    Ok(EtlStream::new(CHANGES, extract, transform, load).boxed())
}

/// Overrides the load settings of every configured stream for a dry run.
pub fn dry_run(config: &mut MigratorConfig) {
    for stream in config.streams.values_mut() {
        stream.load.dry_run = true;
    }
}
