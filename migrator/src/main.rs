//! Migration binary.
//!
//! Loads the configuration, restores the state snapshot, runs the registered streams in order
//! and saves the state again, also when a stream fails so that a rerun resumes from it.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use config::load_config;
use config::shared::MigratorConfig;
use etl::state::StateStore;
use etl::stream::Runner;
use rdm::streams;
use telemetry::tracing::init_tracing;
use tracing::{error, info};

use crate::error::MigratorResult;

mod error;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file, in YAML or JSON.
    #[arg(long, short)]
    config: PathBuf,

    /// Only run this stream. Repeat to run several.
    #[arg(long = "stream")]
    streams: Vec<String>,

    /// Generate every operation without writing to the target database.
    #[arg(long)]
    dry_run: bool,
}

fn install_crypto_provider() {
    // Fails only when a provider is already installed.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("migration failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> MigratorResult<()> {
    let mut config: MigratorConfig = load_config(&args.config)?;
    config.validate()?;
    if args.dry_run {
        streams::dry_run(&mut config);
    }

    let _log_flusher = init_tracing(
        env!("CARGO_BIN_NAME"),
        config.log.dir.as_deref(),
        config.log.level.as_deref(),
    )?;
    install_crypto_provider();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(migrate(config, args.streams))
        .inspect_err(|err| error!(error = %err, "migration failed"))
}

async fn migrate(config: MigratorConfig, only: Vec<String>) -> MigratorResult<()> {
    let mut state = StateStore::with_defaults(config.state.cache);
    state.load(&config.state.path).await?;

    let runner = Runner::new(streams::all());
    let selected = runner
        .selected(&config, &only)?
        .iter()
        .map(|definition| definition.name())
        .collect::<Vec<_>>();
    info!(streams = ?selected, "starting migration");
    let result = runner.run(&config, &mut state, &only).await;

    state.flush_cache();
    let saved = state.save(&config.state.path).await;

    for (stream, summary) in result? {
        info!(
            stream,
            loaded = summary.loaded,
            failed = summary.failed,
            "stream summary"
        );
    }
    saved?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_can_be_repeated() {
        let args = Args::try_parse_from([
            "migrator",
            "--config",
            "migrator.yaml",
            "--stream",
            "records",
            "--stream",
            "changes",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(args.config, PathBuf::from("migrator.yaml"));
        assert_eq!(args.streams, vec!["records", "changes"]);
        assert!(args.dry_run);
    }

    #[test]
    fn config_is_required() {
        assert!(Args::try_parse_from(["migrator"]).is_err());
    }
}
