use std::collections::HashSet;
use std::path::{Path, PathBuf};

use config::shared::{LoadConfig, PgConnectionConfig};
use futures::StreamExt;
use futures::stream::BoxStream;
use postgres::schema::TableModel;
use tracing::{error, info, warn};

use crate::error::EtlResult;
use crate::load::{Load, LoadSummary};
use crate::load::bulk::{
    CopyTarget, CsvStage, PgCopyTarget, StagedTables, TableGenerator, csv_path, encode_row,
};
use crate::state::StateStore;
use crate::types::Entry;

/// Outcome of a bulk load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkLoadReport {
    /// Entries expanded by the generators.
    pub entries: usize,
    /// Entries skipped because a generator failed on them or one of their rows did not encode.
    pub skipped_entries: usize,
    /// Tables copied, with their row counts, in load order.
    pub loaded: Vec<(String, u64)>,
    /// Tables whose copy failed.
    pub failed: Vec<String>,
    /// Tables without a CSV file.
    pub missing: Vec<String>,
    /// Sequences restarted, with their new next value.
    pub sequences: Vec<(String, i64)>,
}

/// Loads entries through CSV staging and `COPY`.
///
/// Stages run in order: every entry is expanded by every generator into per-table CSV files,
/// the tables are copied in the order the generators declare them, generators run their
/// post-load hooks, the sequences attached to the copied columns are restarted after the
/// loaded maximum, and finally the staged files are removed when cleanup is enabled.
///
/// A failing copy is logged and the remaining tables are still loaded; tables committed
/// earlier stay committed.
pub struct BulkLoader<C> {
    target: C,
    generators: Vec<Box<dyn TableGenerator>>,
    tmp_dir: PathBuf,
    data_dir: Option<PathBuf>,
    existing_data: bool,
    cleanup: bool,
}

impl<C: CopyTarget + Sync> BulkLoader<C> {
    pub fn new(target: C, generators: Vec<Box<dyn TableGenerator>>, config: &LoadConfig) -> Self {
        Self {
            target,
            generators,
            tmp_dir: config.tmp_dir.clone(),
            data_dir: config.data_dir.clone(),
            existing_data: config.existing_data,
            cleanup: config.cleanup,
        }
    }

    pub fn target(&self) -> &C {
        &self.target
    }

    fn uses_existing_data(&self, generator: &dyn TableGenerator) -> bool {
        self.existing_data || generator.existing_data()
    }

    /// Runs every stage and reports per-table results.
    pub async fn run(
        &mut self,
        input: BoxStream<'static, EtlResult<Entry>>,
        state: &mut StateStore,
    ) -> EtlResult<BulkLoadReport> {
        let mut report = BulkLoadReport::default();

        let stage = CsvStage::create(&self.tmp_dir)?;
        let stage_dir = stage.dir().to_path_buf();
        let staged = match self.stage(stage, input, state, &mut report).await {
            Ok(staged) => staged,
            Err(err) => {
                self.remove_stage(&stage_dir).await;
                return Err(err);
            }
        };

        let order = self.table_order();
        for (existing, model) in &order {
            self.copy_table(*existing, model, &staged, &mut report).await;
        }

        for generator in &mut self.generators {
            if let Err(err) = generator.post_load(state) {
                error!(generator = generator.name(), error = %err, "post load hook failed");
            }
        }

        let tables = order.iter().map(|(_, model)| model.name).collect::<Vec<_>>();
        self.repair_sequences(&tables, &mut report).await?;

        self.remove_stage(&stage_dir).await;
        info!(
            entries = report.entries,
            tables = report.loaded.len(),
            failed = report.failed.len(),
            "bulk load finished"
        );

        Ok(report)
    }

    async fn stage(
        &mut self,
        mut stage: CsvStage,
        mut input: BoxStream<'static, EtlResult<Entry>>,
        state: &mut StateStore,
        report: &mut BulkLoadReport,
    ) -> EtlResult<StagedTables> {
        while let Some(entry) = input.next().await {
            let entry = entry?;
            report.entries += 1;

            state.savepoint();
            match self.expand(&entry, state) {
                Ok(encoded) => {
                    state.release_savepoint();
                    for (model, fields) in &encoded {
                        stage.write_fields(model, fields)?;
                    }
                }
                Err(err) => {
                    state.rollback_savepoint();
                    let id = entry.get("id").map(ToString::to_string).unwrap_or_default();
                    warn!(entry = %id, error = %err, "skipping entry");
                    report.skipped_entries += 1;
                }
            }
        }

        for generator in &mut self.generators {
            if self.existing_data || generator.existing_data() {
                continue;
            }
            for row in generator.finish(state)? {
                stage.write(&row)?;
            }
        }

        stage.finish()
    }

    /// Runs the generators on `entry` and renders their rows as CSV fields.
    ///
    /// Nothing is staged unless every generator succeeds and every row encodes.
    fn expand(
        &mut self,
        entry: &Entry,
        state: &mut StateStore,
    ) -> EtlResult<Vec<(&'static TableModel, Vec<String>)>> {
        let mut encoded = Vec::new();
        for generator in &mut self.generators {
            if self.existing_data || generator.existing_data() {
                continue;
            }
            let rows = match generator.generate(entry, state) {
                Ok(rows) => rows,
                Err(err) => {
                    error!(generator = generator.name(), error = %err, "table generation failed");
                    return Err(err);
                }
            };
            for row in rows {
                encoded.push((row.model, encode_row(row.model, &row.data)?));
            }
        }

        Ok(encoded)
    }

    /// Returns every declared table once, in first declaration order, with whether it is
    /// loaded from pre-existing data.
    fn table_order(&self) -> Vec<(bool, &'static TableModel)> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        for generator in &self.generators {
            let existing = self.uses_existing_data(generator.as_ref());
            for model in generator.tables() {
                if seen.insert(model) {
                    order.push((existing, model));
                }
            }
        }

        order
    }

    async fn copy_table(
        &mut self,
        existing: bool,
        model: &'static TableModel,
        staged: &StagedTables,
        report: &mut BulkLoadReport,
    ) {
        let dir = match (existing, &self.data_dir) {
            (true, Some(data_dir)) => data_dir.as_path(),
            (true, None) => {
                warn!(table = %model, "table uses existing data but no data directory is configured");
                report.missing.push(model.to_string());
                return;
            }
            (false, _) => staged.dir.as_path(),
        };

        let path = csv_path(dir, model);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            info!(table = %model, path = %path.display(), "no data for table, skipping");
            report.missing.push(model.to_string());
            return;
        }

        match self.target.copy_in(model, &path).await {
            Ok(rows) => {
                info!(table = %model, rows, "table loaded");
                report.loaded.push((model.to_string(), rows));
            }
            Err(err) => {
                error!(table = %model, error = %err, "table copy failed");
                report.failed.push(model.to_string());
            }
        }
    }

    async fn repair_sequences(
        &mut self,
        tables: &[&'static str],
        report: &mut BulkLoadReport,
    ) -> EtlResult<()> {
        if tables.is_empty() {
            return Ok(());
        }

        for sequence in self.target.owned_sequences(tables).await? {
            let name = format!("{}.{}", sequence.sequence_schema, sequence.sequence_name);
            let max = match self.target.column_max(&sequence).await {
                Ok(Some(max)) => max,
                Ok(None) => continue,
                Err(err) => {
                    error!(sequence = %name, error = %err, "reading column maximum failed");
                    continue;
                }
            };

            match self.target.restart_sequence(&sequence, max + 1).await {
                Ok(()) => {
                    info!(sequence = %name, next = max + 1, "sequence restarted");
                    report.sequences.push((name, max + 1));
                }
                Err(err) => error!(sequence = %name, error = %err, "sequence restart failed"),
            }
        }

        Ok(())
    }

    async fn remove_stage(&self, dir: &Path) {
        if !self.cleanup {
            return;
        }
        if let Err(err) = tokio::fs::remove_dir_all(dir).await {
            warn!(dir = %dir.display(), error = %err, "removing staged tables failed");
        }
    }
}

impl BulkLoadReport {
    pub fn summary(&self) -> LoadSummary {
        LoadSummary {
            loaded: self.loaded.iter().map(|(_, rows)| rows).sum(),
            failed: (self.skipped_entries + self.failed.len()) as u64,
        }
    }
}

impl<C: CopyTarget + Sync> Load for BulkLoader<C> {
    type Item = Entry;

    async fn load(
        &mut self,
        input: BoxStream<'static, EtlResult<Entry>>,
        state: &mut StateStore,
    ) -> EtlResult<LoadSummary> {
        Ok(self.run(input, state).await?.summary())
    }
}

/// Bulk load into the configured database, connecting when the load starts.
pub struct PgBulkLoad {
    db: PgConnectionConfig,
    config: LoadConfig,
    generators: Vec<Box<dyn TableGenerator>>,
}

impl PgBulkLoad {
    pub fn new(
        db: PgConnectionConfig,
        config: LoadConfig,
        generators: Vec<Box<dyn TableGenerator>>,
    ) -> Self {
        Self {
            db,
            config,
            generators,
        }
    }

    /// Runs every stage and reports per-table results.
    pub async fn run(
        &mut self,
        input: BoxStream<'static, EtlResult<Entry>>,
        state: &mut StateStore,
    ) -> EtlResult<BulkLoadReport> {
        let client = postgres::client::connect(&self.db).await?;
        let generators = std::mem::take(&mut self.generators);
        let mut loader = BulkLoader::new(PgCopyTarget::new(client), generators, &self.config);

        loader.run(input, state).await
    }
}

impl Load for PgBulkLoad {
    type Item = Entry;

    async fn load(
        &mut self,
        input: BoxStream<'static, EtlResult<Entry>>,
        state: &mut StateStore,
    ) -> EtlResult<LoadSummary> {
        Ok(self.run(input, state).await?.summary())
    }
}
