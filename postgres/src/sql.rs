use pg_escape::quote_identifier;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::{ColumnSchema, ColumnType, TableModel};
use crate::types::{ValueConversionError, render_value};

/// Errors raised while building a statement for a table model.
#[derive(Debug, Error)]
pub enum StatementError {
    #[error("table `{table}` has no column `{column}`")]
    UnknownColumn { table: String, column: String },

    #[error("row for table `{table}` is missing primary key column `{column}`")]
    MissingPrimaryKey { table: String, column: &'static str },

    #[error("update of table `{table}` carries no column besides the primary key")]
    EmptyUpdate { table: String },

    #[error("insert into table `{table}` carries no column")]
    EmptyInsert { table: String },

    #[error(transparent)]
    Conversion(#[from] ValueConversionError),
}

/// A parameterized statement whose parameters are text renderings of the row values.
///
/// Every placeholder is cast as `$n::text::<type>` so that parameters can be bound as
/// optional strings regardless of the column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Option<String>>,
}

impl Statement {
    fn new(sql: String, params: Vec<Option<String>>) -> Self {
        Self { sql, params }
    }

    /// Returns the parameters in a form accepted by `tokio_postgres::Client::query`.
    pub fn param_refs(&self) -> Vec<&(dyn tokio_postgres::types::ToSql + Sync)> {
        self.params
            .iter()
            .map(|param| param as &(dyn tokio_postgres::types::ToSql + Sync))
            .collect()
    }
}

struct Placeholders {
    params: Vec<Option<String>>,
}

impl Placeholders {
    fn new() -> Self {
        Self { params: Vec::new() }
    }

    fn push(&mut self, column: &ColumnSchema, value: &Value) -> Result<String, StatementError> {
        self.params.push(render_value(value, column)?);
        Ok(format!(
            "${}::text::{}",
            self.params.len(),
            column.typ.pg_type_name()
        ))
    }
}

fn present_columns<'a>(
    model: &'a TableModel,
    row: &'a Map<String, Value>,
) -> Result<Vec<(&'a ColumnSchema, &'a Value)>, StatementError> {
    if let Some(unknown) = row.keys().find(|key| model.column(key).is_none()) {
        return Err(StatementError::UnknownColumn {
            table: model.to_string(),
            column: unknown.clone(),
        });
    }

    Ok(model
        .columns
        .iter()
        .filter_map(|column| row.get(column.name).map(|value| (column, value)))
        .collect())
}

fn primary_key_predicate(
    model: &TableModel,
    row: &Map<String, Value>,
    placeholders: &mut Placeholders,
) -> Result<String, StatementError> {
    let mut predicates = Vec::new();
    for column in model.primary_key() {
        let value = row
            .get(column.name)
            .filter(|value| !value.is_null())
            .ok_or_else(|| StatementError::MissingPrimaryKey {
                table: model.to_string(),
                column: column.name,
            })?;
        predicates.push(format!(
            "{} = {}",
            quote_identifier(column.name),
            placeholders.push(column, value)?
        ));
    }

    Ok(predicates.join(" and "))
}

/// Builds an `insert` of the columns present in `row`.
pub fn insert(model: &TableModel, row: &Map<String, Value>) -> Result<Statement, StatementError> {
    let columns = present_columns(model, row)?;
    if columns.is_empty() {
        return Err(StatementError::EmptyInsert {
            table: model.to_string(),
        });
    }

    let mut placeholders = Placeholders::new();
    let mut names = Vec::with_capacity(columns.len());
    let mut values = Vec::with_capacity(columns.len());
    for (column, value) in columns {
        names.push(quote_identifier(column.name).into_owned());
        values.push(placeholders.push(column, value)?);
    }

    let sql = format!(
        "insert into {} ({}) values ({})",
        model.as_quoted_identifier(),
        names.join(", "),
        values.join(", ")
    );

    Ok(Statement::new(sql, placeholders.params))
}

/// Builds an `update` setting every non-key column present in `row`, keyed on the primary key.
pub fn update(model: &TableModel, row: &Map<String, Value>) -> Result<Statement, StatementError> {
    let columns = present_columns(model, row)?;
    let mut placeholders = Placeholders::new();

    let mut assignments = Vec::new();
    for (column, value) in columns.into_iter().filter(|(column, _)| !column.primary_key) {
        assignments.push(format!(
            "{} = {}",
            quote_identifier(column.name),
            placeholders.push(column, value)?
        ));
    }
    if assignments.is_empty() {
        return Err(StatementError::EmptyUpdate {
            table: model.to_string(),
        });
    }

    let predicate = primary_key_predicate(model, row, &mut placeholders)?;
    let sql = format!(
        "update {} set {} where {}",
        model.as_quoted_identifier(),
        assignments.join(", "),
        predicate
    );

    Ok(Statement::new(sql, placeholders.params))
}

/// Builds a `delete` keyed on the primary key columns of `row`.
pub fn delete(model: &TableModel, row: &Map<String, Value>) -> Result<Statement, StatementError> {
    present_columns(model, row)?;
    let mut placeholders = Placeholders::new();
    let predicate = primary_key_predicate(model, row, &mut placeholders)?;
    let sql = format!(
        "delete from {} where {}",
        model.as_quoted_identifier(),
        predicate
    );

    Ok(Statement::new(sql, placeholders.params))
}

/// Builds a `select` returning each matching row as a single `jsonb` column.
///
/// Rows are filtered by equality on every entry of `filter`.
pub fn select(model: &TableModel, filter: &Map<String, Value>) -> Result<Statement, StatementError> {
    let columns = present_columns(model, filter)?;
    let mut placeholders = Placeholders::new();

    let mut predicates = Vec::with_capacity(columns.len());
    for (column, value) in columns {
        let predicate = match value {
            Value::Null => format!("t.{} is null", quote_identifier(column.name)),
            value => format!(
                "t.{} = {}",
                quote_identifier(column.name),
                placeholders.push(column, value)?
            ),
        };
        predicates.push(predicate);
    }

    let mut sql = format!(
        "select to_jsonb(t.*) from {} as t",
        model.as_quoted_identifier()
    );
    if !predicates.is_empty() {
        sql.push_str(" where ");
        sql.push_str(&predicates.join(" and "));
    }

    Ok(Statement::new(sql, placeholders.params))
}

/// Builds the `copy ... from stdin` statement listing every column of the model.
///
/// Empty fields of non-nullable text columns are read as empty strings rather than NULL.
pub fn copy_in(model: &TableModel) -> String {
    let not_null = model
        .columns
        .iter()
        .filter(|column| !column.nullable && column.typ == ColumnType::String)
        .map(|column| quote_identifier(column.name).into_owned())
        .collect::<Vec<_>>();

    let mut options = String::from("format csv");
    if !not_null.is_empty() {
        options.push_str(&format!(", force_not_null ({})", not_null.join(", ")));
    }

    format!(
        "copy {} ({}) from stdin with ({options})",
        model.as_quoted_identifier(),
        model.quoted_column_list()
    )
}

/// Builds the query returning the maximum of an integer column as `bigint`.
pub fn max_value(schema: &str, table: &str, column: &str) -> String {
    format!(
        "select max({})::bigint from {}.{}",
        quote_identifier(column),
        quote_identifier(schema),
        quote_identifier(table)
    )
}

/// Builds the statement restarting a sequence at `value`.
pub fn restart_sequence(schema: &str, sequence: &str, value: i64) -> String {
    format!(
        "alter sequence {}.{} restart with {}",
        quote_identifier(schema),
        quote_identifier(sequence),
        value
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;
    use serde_json::json;

    static OBJECTS: TableModel = TableModel::new(
        "files_object",
        &[
            ColumnSchema::new("version_id", ColumnType::Uuid).primary_key(),
            ColumnSchema::new("bucket_id", ColumnType::Uuid),
            ColumnSchema::new("path", ColumnType::String),
            ColumnSchema::new("file_id", ColumnType::Uuid).nullable(),
            ColumnSchema::new("is_head", ColumnType::Boolean),
        ],
    );

    const VERSION: &str = "0b3c7a0e-6d0e-4c4c-8d3b-7f0f4d5b8e11";
    const BUCKET: &str = "6f1d0b52-0a1f-4e36-94c3-2a35a4c2a1d0";

    fn row(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn insert_binds_present_columns_in_model_order() {
        let statement = insert(
            &OBJECTS,
            &row(json!({"is_head": true, "path": "data.zip", "version_id": VERSION})),
        )
        .unwrap();

        assert_eq!(
            statement.sql,
            "insert into files_object (version_id, path, is_head) values ($1::text::uuid, $2::text::text, $3::text::boolean)"
        );
        assert_eq!(
            statement.params,
            vec![
                Some(VERSION.to_string()),
                Some("data.zip".to_string()),
                Some("true".to_string())
            ]
        );
    }

    #[test]
    fn update_uses_primary_key_as_predicate() {
        let statement = update(
            &OBJECTS,
            &row(json!({"version_id": VERSION, "is_head": false, "file_id": null})),
        )
        .unwrap();

        assert_eq!(
            statement.sql,
            "update files_object set file_id = $1::text::uuid, is_head = $2::text::boolean where version_id = $3::text::uuid"
        );
        assert_eq!(statement.params[0], None);
        assert_eq!(statement.params[2], Some(VERSION.to_string()));
    }

    #[test]
    fn update_and_delete_require_primary_key() {
        let without_key = row(json!({"is_head": false}));
        assert!(matches!(
            update(&OBJECTS, &without_key),
            Err(StatementError::MissingPrimaryKey { column: "version_id", .. })
        ));
        assert!(matches!(
            delete(&OBJECTS, &without_key),
            Err(StatementError::MissingPrimaryKey { .. })
        ));
        assert!(matches!(
            update(&OBJECTS, &row(json!({"version_id": VERSION}))),
            Err(StatementError::EmptyUpdate { .. })
        ));
    }

    #[test]
    fn unknown_columns_are_rejected() {
        assert!(matches!(
            insert(&OBJECTS, &row(json!({"version_id": VERSION, "size": 3}))),
            Err(StatementError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn select_filters_by_equality() {
        let statement = select(
            &OBJECTS,
            &row(json!({"bucket_id": BUCKET, "is_head": true, "file_id": null})),
        )
        .unwrap();

        assert_eq!(
            statement.sql,
            "select to_jsonb(t.*) from files_object as t where t.bucket_id = $1::text::uuid and t.file_id is null and t.is_head = $2::text::boolean"
        );
        assert_eq!(statement.params.len(), 2);
    }

    #[test]
    fn copy_and_sequence_statements() {
        assert_eq!(
            copy_in(&OBJECTS),
            "copy files_object (version_id, bucket_id, path, file_id, is_head) from stdin with (format csv, force_not_null (path))"
        );
        assert_eq!(
            max_value("public", "pidstore_pid", "id"),
            "select max(id)::bigint from public.pidstore_pid"
        );
        assert_eq!(
            restart_sequence("public", "pidstore_pid_id_seq", 1_000_043),
            "alter sequence public.pidstore_pid_id_seq restart with 1000043"
        );
    }
}
