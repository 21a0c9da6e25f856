use config::shared::{PgConnectionConfig, TlsConfig};
use postgres::client::connect;
use postgres::sequences::{OwnedSequence, column_max, owned_sequences, restart};
use secrecy::SecretString;
use tokio_postgres::Client;

/// Connection to the test database, read from `TESTS_DATABASE_HOST`, `TESTS_DATABASE_PORT`,
/// `TESTS_DATABASE_NAME`, `TESTS_DATABASE_USERNAME` and `TESTS_DATABASE_PASSWORD`.
///
/// Returns `None` when no test database is configured.
fn test_database() -> Option<PgConnectionConfig> {
    let host = std::env::var("TESTS_DATABASE_HOST").ok()?;

    Some(PgConnectionConfig {
        host,
        port: std::env::var("TESTS_DATABASE_PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or(5432),
        name: std::env::var("TESTS_DATABASE_NAME").unwrap_or_else(|_| "postgres".to_string()),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .unwrap_or_else(|_| "postgres".to_string()),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(SecretString::new),
        tls: TlsConfig::default(),
    })
}

async fn schema(client: &Client, name: &str) {
    client
        .batch_execute(&format!("drop schema if exists {name} cascade; create schema {name}"))
        .await
        .expect("failed to create the test schema");
}

#[tokio::test]
async fn sequences_behind_column_defaults_are_found() {
    let Some(config) = test_database() else {
        eprintln!("TESTS_DATABASE_HOST is not set, skipping");
        return;
    };
    let client = connect(&config).await.unwrap();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let schema_name = format!("seq_{suffix}");
    let serial_table = format!("serial_{suffix}");
    let default_table = format!("default_{suffix}");
    schema(&client, &schema_name).await;

    client
        .batch_execute(&format!(
            "create table {schema_name}.{serial_table} (id serial primary key);
             create sequence {schema_name}.shared_ids;
             create table {schema_name}.{default_table} (
                 id bigint primary key default nextval('{schema_name}.shared_ids'),
                 seq_no integer generated always as identity
             );
             insert into {schema_name}.{default_table} (id) values (41), (42);"
        ))
        .await
        .unwrap();

    let found = owned_sequences(&client, &[serial_table.as_str(), default_table.as_str()])
        .await
        .unwrap();

    let columns = found
        .iter()
        .map(|sequence| (sequence.table_name.as_str(), sequence.column_name.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        columns,
        vec![
            (default_table.as_str(), "id"),
            (default_table.as_str(), "seq_no"),
            (serial_table.as_str(), "id"),
        ]
    );

    let shared: &OwnedSequence = &found[0];
    assert_eq!(shared.sequence_name, "shared_ids");
    assert_eq!(shared.sequence_schema, schema_name);
    assert_eq!(column_max(&client, shared).await.unwrap(), Some(42));

    restart(&client, shared, 43).await.unwrap();
    let next: i64 = client
        .query_one(&format!("select nextval('{schema_name}.shared_ids')"), &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(next, 43);

    client
        .batch_execute(&format!("drop schema {schema_name} cascade"))
        .await
        .unwrap();
}
