use tokio_postgres::Client;

/// Catalog query listing the sequences attached to columns of the given tables.
///
/// A sequence is attached to a column when the column owns it (`serial` columns and `owned by`
/// sequences), when it backs an identity column, or when the column default calls `nextval` on
/// it. The last case only leaves a normal dependency of the column default on the sequence.
pub const OWNED_SEQUENCES_QUERY: &str = r#"
select sequence_schema, sequence_name, table_schema, table_name, column_name
from (
    select
        sn.nspname as sequence_schema,
        s.relname as sequence_name,
        tn.nspname as table_schema,
        t.relname as table_name,
        a.attname as column_name
    from pg_class s
    join pg_namespace sn on sn.oid = s.relnamespace
    join pg_depend d
        on d.objid = s.oid
        and d.classid = 'pg_class'::regclass
        and d.refclassid = 'pg_class'::regclass
    join pg_class t on t.oid = d.refobjid
    join pg_namespace tn on tn.oid = t.relnamespace
    join pg_attribute a on a.attrelid = t.oid and a.attnum = d.refobjsubid
    where s.relkind = 'S'
        and d.deptype in ('a', 'i')
        and t.relname = any($1)
    union
    select
        sn.nspname,
        s.relname,
        tn.nspname,
        t.relname,
        a.attname
    from pg_attrdef ad
    join pg_depend d
        on d.objid = ad.oid
        and d.classid = 'pg_attrdef'::regclass
        and d.refclassid = 'pg_class'::regclass
        and d.deptype = 'n'
    join pg_class s on s.oid = d.refobjid and s.relkind = 'S'
    join pg_namespace sn on sn.oid = s.relnamespace
    join pg_class t on t.oid = ad.adrelid
    join pg_namespace tn on tn.oid = t.relnamespace
    join pg_attribute a on a.attrelid = t.oid and a.attnum = ad.adnum
    where t.relname = any($1)
) sequences
order by table_name, column_name
"#;

/// A sequence attached to a table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedSequence {
    pub sequence_schema: String,
    pub sequence_name: String,
    pub table_schema: String,
    pub table_name: String,
    pub column_name: String,
}

/// Lists the sequences attached to columns of `tables`, once per column.
pub async fn owned_sequences(
    client: &Client,
    tables: &[&str],
) -> Result<Vec<OwnedSequence>, tokio_postgres::Error> {
    let tables: Vec<String> = tables.iter().map(|table| table.to_string()).collect();
    let rows = client.query(OWNED_SEQUENCES_QUERY, &[&tables]).await?;

    rows.iter()
        .map(|row| {
            Ok(OwnedSequence {
                sequence_schema: row.try_get("sequence_schema")?,
                sequence_name: row.try_get("sequence_name")?,
                table_schema: row.try_get("table_schema")?,
                table_name: row.try_get("table_name")?,
                column_name: row.try_get("column_name")?,
            })
        })
        .collect()
}

/// Returns the maximum value of the column the sequence is attached to, if any row exists.
pub async fn column_max(
    client: &Client,
    sequence: &OwnedSequence,
) -> Result<Option<i64>, tokio_postgres::Error> {
    let query = crate::sql::max_value(
        &sequence.table_schema,
        &sequence.table_name,
        &sequence.column_name,
    );
    let row = client.query_one(query.as_str(), &[]).await?;

    row.try_get(0)
}

/// Restarts `sequence` so that its next value is `value`.
pub async fn restart(
    client: &Client,
    sequence: &OwnedSequence,
    value: i64,
) -> Result<(), tokio_postgres::Error> {
    let statement = crate::sql::restart_sequence(
        &sequence.sequence_schema,
        &sequence.sequence_name,
        value,
    );
    client.batch_execute(&statement).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_covers_owned_identity_and_default_sequences() {
        let query = OWNED_SEQUENCES_QUERY;

        assert!(query.contains("d.deptype in ('a', 'i')"));
        assert!(query.contains("from pg_attrdef ad"));
        assert!(query.contains("d.classid = 'pg_attrdef'::regclass"));
        assert!(query.contains("d.deptype = 'n'"));
        assert!(query.contains("a.attnum = ad.adnum"));
        // Both branches are filtered by table and merged without duplicates.
        assert_eq!(query.matches("t.relname = any($1)").count(), 2);
        assert!(query.contains("    union\n"));
    }
}
