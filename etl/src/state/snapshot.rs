//! SQLite snapshots of the persisted state tables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use tracing::warn;

use crate::error::EtlResult;
use crate::state::table::StateTable;
use crate::types::Row;

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Writes `tables` to `path` through a temporary file and an atomic rename.
pub(super) async fn write(
    path: &Path,
    tables: &[(StateTable, &BTreeMap<String, Row>)],
) -> EtlResult<()> {
    let tmp = sibling(path, "tmp");
    let backup = sibling(path, "backup");

    if tokio::fs::try_exists(&tmp).await? {
        tokio::fs::remove_file(&tmp).await?;
    }
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let options = SqliteConnectOptions::new()
        .filename(&tmp)
        .create_if_missing(true);
    let mut connection = SqliteConnection::connect_with(&options).await?;
    let mut transaction = connection.begin().await?;

    for (table, rows) in tables {
        let create = format!(
            "create table {} (pk text primary key, data text not null)",
            table.name()
        );
        sqlx::query(&create).execute(&mut *transaction).await?;

        let insert = format!("insert into {} (pk, data) values (?, ?)", table.name());
        for (key, row) in rows.iter() {
            sqlx::query(&insert)
                .bind(key)
                .bind(serde_json::to_string(row)?)
                .execute(&mut *transaction)
                .await?;
        }
    }

    transaction.commit().await?;
    connection.close().await?;

    if tokio::fs::try_exists(path).await? {
        tokio::fs::rename(path, &backup).await?;
    }
    tokio::fs::rename(&tmp, path).await?;
    if tokio::fs::try_exists(&backup).await? {
        tokio::fs::remove_file(&backup).await?;
    }

    Ok(())
}

/// Reads the snapshot at `path`, or at its backup when `path` is missing.
pub(super) async fn read(path: &Path) -> EtlResult<Option<Vec<(StateTable, Vec<(String, Row)>)>>> {
    let backup = sibling(path, "backup");
    let source = if tokio::fs::try_exists(path).await? {
        path.to_path_buf()
    } else if tokio::fs::try_exists(&backup).await? {
        warn!(path = %path.display(), "state snapshot missing, restoring from backup");
        backup
    } else {
        return Ok(None);
    };

    let options = SqliteConnectOptions::new().filename(&source).read_only(true);
    let mut connection = SqliteConnection::connect_with(&options).await?;

    let mut tables = Vec::with_capacity(StateTable::ALL.len());
    for table in StateTable::ALL {
        let select = format!("select pk, data from {} order by pk", table.name());
        let rows: Vec<(String, String)> = sqlx::query_as(&select)
            .fetch_all(&mut connection)
            .await?;

        let rows = rows
            .into_iter()
            .map(|(key, data)| Ok((key, serde_json::from_str::<Row>(&data)?)))
            .collect::<EtlResult<Vec<_>>>()?;
        tables.push((table, rows));
    }

    connection.close().await?;

    Ok(Some(tables))
}
