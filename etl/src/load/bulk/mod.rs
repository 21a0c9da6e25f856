//! Bulk loading: entries are expanded into table rows, staged as CSV files and copied into the
//! target database in dependency order, after which the sequences of the loaded columns are
//! moved past the loaded values.

mod generator;
mod loader;
mod staging;
mod target;

pub use generator::{TableGenerator, TableRow};
pub use loader::{BulkLoadReport, BulkLoader, PgBulkLoad};
pub use staging::{CsvStage, StagedTables, csv_path, encode_row, read_rows};
pub use target::{CopyTarget, PgCopyTarget};
