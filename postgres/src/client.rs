use std::io::BufReader;

use config::shared::{IntoConnectOptions, PgConnectionConfig};
use rustls::ClientConfig;
use thiserror::Error;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{Client, Config, Connection, NoTls, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, error, info};

/// Errors raised while opening a connection to the target database.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to read trusted root certificates: {0}")]
    Certificates(#[from] std::io::Error),

    #[error("invalid trusted root certificate: {0}")]
    InvalidCertificate(#[from] rustls::Error),

    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),
}

/// Spawns a background task driving a Postgres connection until it terminates.
fn spawn_postgres_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        match connection.await {
            Err(err) => error!("an error occurred during the postgres connection: {}", err),
            Ok(()) => info!("postgres connection terminated successfully"),
        }
    }
    .instrument(span);

    // The client terminates the connection when dropped, so the handle is not tracked.
    tokio::spawn(task);
}

/// Connects to the configured target database, with TLS when enabled.
pub async fn connect(pg_connection_config: &PgConnectionConfig) -> Result<Client, ConnectError> {
    let config: Config = pg_connection_config.with_db();

    if !pg_connection_config.tls.enabled {
        let (client, connection) = config.connect(NoTls).await?;
        spawn_postgres_connection::<NoTls>(connection);
        info!("successfully connected to postgres without tls");

        return Ok(client);
    }

    let mut root_store = rustls::RootCertStore::empty();
    let mut root_certs_reader =
        BufReader::new(pg_connection_config.tls.trusted_root_certs.as_bytes());
    for cert in rustls_pemfile::certs(&mut root_certs_reader) {
        root_store.add(cert?)?;
    }

    let tls_config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let (client, connection) = config.connect(MakeRustlsConnect::new(tls_config)).await?;
    spawn_postgres_connection::<MakeRustlsConnect>(connection);
    info!("successfully connected to postgres with tls");

    Ok(client)
}
