use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::Utc;
use postgres::schema::TableModel;
use postgres::types::{parse_value, render_value};
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::load::bulk::TableRow;
use crate::types::Row;

/// Returns the CSV file of `model` inside `dir`.
pub fn csv_path(dir: &Path, model: &TableModel) -> PathBuf {
    match model.schema {
        Some(schema) => dir.join(format!("{schema}.{}.csv", model.name)),
        None => dir.join(format!("{}.csv", model.name)),
    }
}

/// Renders `data` as the CSV fields of `model`, in column order.
///
/// Missing columns take the column default, or an empty field.
pub fn encode_row(model: &TableModel, data: &Row) -> EtlResult<Vec<String>> {
    if let Some(unknown) = data.keys().find(|key| model.column(key).is_none()) {
        bail!(
            ErrorKind::InvalidData,
            "Row carries a column unknown to its table",
            format!("{model}.{unknown}")
        );
    }

    model
        .columns
        .iter()
        .map(|column| match data.get(column.name) {
            Some(value) => Ok(render_value(value, column)?.unwrap_or_default()),
            None => Ok(column.default.unwrap_or_default().to_string()),
        })
        .collect()
}

/// Reads back the rows of a staged CSV file.
pub fn read_rows(path: &Path, model: &TableModel) -> EtlResult<Vec<Row>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Row::new();
        for (column, field) in model.columns.iter().zip(record.iter()) {
            row.insert(column.name.to_string(), parse_value(field, column)?);
        }
        rows.push(row);
    }

    Ok(rows)
}

/// CSV files staged for one load, with their row counts keyed by file path.
#[derive(Debug, Clone, Default)]
pub struct StagedTables {
    pub dir: PathBuf,
    pub rows: BTreeMap<PathBuf, usize>,
}

/// Per-table CSV writers of a staging directory.
///
/// A writer is opened on the first row of its table. Every writer is flushed by
/// [`CsvStage::finish`] and closed when the stage is dropped, including on error paths.
pub struct CsvStage {
    dir: PathBuf,
    writers: HashMap<PathBuf, csv::Writer<File>>,
    rows: BTreeMap<PathBuf, usize>,
}

impl CsvStage {
    /// Creates a `tables-<timestamp>` directory under `tmp_dir`.
    pub fn create(tmp_dir: &Path) -> EtlResult<Self> {
        let name = format!("tables-{}", Utc::now().format("%Y%m%dT%H%M%S%.6f"));
        let dir = tmp_dir.join(name);
        std::fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "staging tables");

        Ok(Self {
            dir,
            writers: HashMap::new(),
            rows: BTreeMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&mut self, row: &TableRow) -> EtlResult<()> {
        let fields = encode_row(row.model, &row.data)?;
        self.write_fields(row.model, &fields)
    }

    /// Appends fields already rendered by [`encode_row`] to the file of `model`.
    pub fn write_fields(&mut self, model: &TableModel, fields: &[String]) -> EtlResult<()> {
        let path = csv_path(&self.dir, model);

        let writer = match self.writers.entry(path.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!(table = %model, path = %path.display(), "opening staging file");
                let writer = csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_path(entry.key())?;
                entry.insert(writer)
            }
        };
        writer.write_record(fields)?;
        *self.rows.entry(path).or_default() += 1;

        Ok(())
    }

    /// Flushes and closes every writer.
    pub fn finish(mut self) -> EtlResult<StagedTables> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        self.writers.clear();

        Ok(StagedTables {
            dir: self.dir,
            rows: self.rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use postgres::schema::{ColumnSchema, ColumnType};
    use serde_json::json;

    use super::*;
    use crate::test_utils::temp_dir;
    use crate::types::row_from;

    static RECORDS: TableModel = TableModel::new(
        "rdm_records_metadata",
        &[
            ColumnSchema::new("id", ColumnType::Uuid).primary_key(),
            ColumnSchema::new("json", ColumnType::Json).nullable(),
            ColumnSchema::new("created", ColumnType::DateTime),
            ColumnSchema::new("version_id", ColumnType::Integer),
            ColumnSchema::new("index", ColumnType::Integer).nullable(),
            ColumnSchema::new("deletion_status", ColumnType::String).with_default("P"),
            ColumnSchema::new("title", ColumnType::String),
            ColumnSchema::new("bucket_id", ColumnType::Uuid).nullable(),
        ],
    );

    #[test]
    fn rows_round_trip_through_csv() {
        let dir = temp_dir("staging");
        let mut stage = CsvStage::create(&dir).unwrap();
        let rows = vec![
            row_from(json!({
                "id": "2D69C3C5-7D59-4C0A-A7B6-3A5F1B0E8386",
                "json": {"id": "12345678", "metadata": {"title": "Gödel, \"Escher\", Bach\n"}},
                "created": "2024-03-01T10:00:00+01:00",
                "version_id": 1,
                "index": 1,
                "title": "",
                "bucket_id": null
            })),
            row_from(json!({
                "id": "c2c1e5b8-0d4b-4a39-9a0c-2d0b7a9d0a11",
                "json": null,
                "created": "2024-03-01T09:00:00.250",
                "version_id": 3,
                "title": "t"
            })),
        ];
        for row in &rows {
            stage.write(&TableRow::new(&RECORDS, row.clone())).unwrap();
        }
        let staged = stage.finish().unwrap();

        let path = csv_path(&staged.dir, &RECORDS);
        assert_eq!(staged.rows[&path], 2);

        let read = read_rows(&path, &RECORDS).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0]["id"], "2d69c3c5-7d59-4c0a-a7b6-3a5f1b0e8386");
        assert_eq!(read[0]["json"], rows[0]["json"]);
        assert_eq!(read[0]["created"], "2024-03-01T09:00:00");
        assert_eq!(read[0]["title"], "");
        assert_eq!(read[0]["bucket_id"], json!(null));
        assert_eq!(read[0]["deletion_status"], "P");
        assert_eq!(read[1]["json"], json!(null));
        assert_eq!(read[1]["index"], json!(null));
        assert_eq!(read[1]["created"], "2024-03-01T09:00:00.250");

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let err = encode_row(&RECORDS, &row_from(json!({"nope": 1}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
